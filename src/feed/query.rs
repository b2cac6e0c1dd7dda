use crate::backend::rest::Order;
use crate::backend::types::{Category, Post, PostStatus};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Latest,
    Oldest,
    MostViewed,
    MostLiked,
    MostCommented,
}

impl SortOrder {
    pub const ALL: [SortOrder; 5] = [
        SortOrder::Latest,
        SortOrder::Oldest,
        SortOrder::MostViewed,
        SortOrder::MostLiked,
        SortOrder::MostCommented,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SortOrder::Latest => "latest",
            SortOrder::Oldest => "oldest",
            SortOrder::MostViewed => "views",
            SortOrder::MostLiked => "likes",
            SortOrder::MostCommented => "comments",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "latest" | "newest" => Some(SortOrder::Latest),
            "oldest" => Some(SortOrder::Oldest),
            "views" | "popular" => Some(SortOrder::MostViewed),
            "likes" => Some(SortOrder::MostLiked),
            "comments" => Some(SortOrder::MostCommented),
            _ => None,
        }
    }

    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|s| *s == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }

    /// Equivalent ordering for a server-side query.
    pub fn server_order(&self) -> Order {
        let (column, ascending) = match self {
            SortOrder::Latest => ("created_at", false),
            SortOrder::Oldest => ("created_at", true),
            SortOrder::MostViewed => ("views_count", false),
            SortOrder::MostLiked => ("likes_count", false),
            SortOrder::MostCommented => ("comments_count", false),
        };
        Order { column, ascending }
    }
}

/// Client-side filter, search and sort over an already-fetched post list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedQuery {
    pub search: String,
    pub category: Option<Category>,
    pub status: Option<PostStatus>,
    /// Every listed tag must be present on a post.
    pub tags: Vec<String>,
    pub sort: SortOrder,
}

impl FeedQuery {
    pub fn matches(&self, post: &Post) -> bool {
        let needle = self.search.trim().to_lowercase();
        let matches_search = needle.is_empty()
            || post.title.to_lowercase().contains(&needle)
            || post.content.to_lowercase().contains(&needle);
        let matches_category = self.category.map_or(true, |c| post.category == c);
        let matches_status = self.status.map_or(true, |s| post.status == s);
        let matches_tags = self.tags.iter().all(|t| post.tags.contains(t));
        matches_search && matches_category && matches_status && matches_tags
    }

    /// Matching posts in display order. Ties keep their fetched order.
    pub fn apply<'a>(&self, posts: &'a [Post]) -> Vec<&'a Post> {
        self.apply_by(posts, |p| p.likes_count)
    }

    /// Like `apply`, with `likes` supplying the count `MostLiked` ranks by.
    pub fn apply_by<'a>(&self, posts: &'a [Post], likes: impl Fn(&Post) -> i64) -> Vec<&'a Post> {
        let mut out: Vec<&Post> = posts.iter().filter(|p| self.matches(p)).collect();
        match self.sort {
            SortOrder::Latest => out.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            SortOrder::Oldest => out.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
            SortOrder::MostViewed => out.sort_by(|a, b| b.views_count.cmp(&a.views_count)),
            SortOrder::MostLiked => out.sort_by_key(|p| std::cmp::Reverse(likes(p))),
            SortOrder::MostCommented => out.sort_by(|a, b| b.comments_count.cmp(&a.comments_count)),
        }
        out
    }

    pub fn toggle_tag(&mut self, tag: &str) {
        if let Some(idx) = self.tags.iter().position(|t| t == tag) {
            self.tags.remove(idx);
        } else {
            self.tags.push(tag.to_string());
        }
    }
}

/// All distinct tags across `posts`, sorted.
pub fn available_tags(posts: &[Post]) -> Vec<String> {
    posts
        .iter()
        .flat_map(|p| p.tags.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Cycle through "all" and each category.
pub fn next_category(current: Option<Category>) -> Option<Category> {
    match current {
        None => Some(Category::ALL[0]),
        Some(c) => {
            let idx = Category::ALL.iter().position(|x| *x == c).unwrap_or(0);
            Category::ALL.get(idx + 1).copied()
        }
    }
}

/// Cycle through "any" and each status.
pub fn next_status(current: Option<PostStatus>) -> Option<PostStatus> {
    match current {
        None => Some(PostStatus::ALL[0]),
        Some(s) => {
            let idx = PostStatus::ALL.iter().position(|x| *x == s).unwrap_or(0);
            PostStatus::ALL.get(idx + 1).copied()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn post(id: &str, title: &str, content: &str, day: u32) -> Post {
        Post {
            id: id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            excerpt: None,
            category: Category::Other,
            status: PostStatus::Published,
            image_url: None,
            tags: Vec::new(),
            author_id: "u1".to_string(),
            author: None,
            likes_count: 0,
            comments_count: 0,
            views_count: 0,
            created_at: Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap(),
            updated_at: None,
        }
    }

    #[test]
    fn test_search_matches_title_or_content_case_insensitive() {
        let posts = vec![
            post("1", "Rust Tips", "ownership", 1),
            post("2", "Cooking", "A RUSTic bread", 2),
            post("3", "Travel", "beaches", 3),
        ];
        let query = FeedQuery {
            search: "rust".to_string(),
            ..Default::default()
        };
        let ids: Vec<_> = query.apply(&posts).iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1"]);
    }

    #[test]
    fn test_empty_search_matches_everything() {
        let posts = vec![post("1", "a", "b", 1), post("2", "c", "d", 2)];
        let query = FeedQuery {
            search: "   ".to_string(),
            ..Default::default()
        };
        assert_eq!(query.apply(&posts).len(), 2);
    }

    #[test]
    fn test_all_selected_tags_required() {
        let mut a = post("a", "a", "", 1);
        a.tags = vec!["rust".to_string(), "async".to_string()];
        let mut b = post("b", "b", "", 2);
        b.tags = vec!["rust".to_string()];
        let posts = vec![a, b];

        let mut query = FeedQuery::default();
        query.toggle_tag("rust");
        assert_eq!(query.apply(&posts).len(), 2);
        query.toggle_tag("async");
        let ids: Vec<_> = query.apply(&posts).iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
        query.toggle_tag("async");
        assert_eq!(query.tags, vec!["rust".to_string()]);
    }

    #[test]
    fn test_category_and_status_filters() {
        let mut food = post("f", "f", "", 1);
        food.category = Category::Food;
        let mut draft = post("d", "d", "", 2);
        draft.status = PostStatus::Draft;
        let posts = vec![food, draft];

        let by_category = FeedQuery {
            category: Some(Category::Food),
            ..Default::default()
        };
        assert_eq!(by_category.apply(&posts)[0].id, "f");

        let drafts = FeedQuery {
            status: Some(PostStatus::Draft),
            ..Default::default()
        };
        let result = drafts.apply(&posts);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "d");
    }

    #[test]
    fn test_sort_orders() {
        let mut a = post("a", "a", "", 1);
        a.views_count = 10;
        a.comments_count = 1;
        let mut b = post("b", "b", "", 2);
        b.views_count = 5;
        b.likes_count = 9;
        let mut c = post("c", "c", "", 3);
        c.comments_count = 4;
        let posts = vec![a, b, c];

        let ids = |sort: SortOrder| -> Vec<String> {
            FeedQuery {
                sort,
                ..Default::default()
            }
            .apply(&posts)
            .iter()
            .map(|p| p.id.clone())
            .collect()
        };
        assert_eq!(ids(SortOrder::Latest), vec!["c", "b", "a"]);
        assert_eq!(ids(SortOrder::Oldest), vec!["a", "b", "c"]);
        assert_eq!(ids(SortOrder::MostViewed), vec!["a", "b", "c"]);
        assert_eq!(ids(SortOrder::MostLiked), vec!["b", "a", "c"]);
        assert_eq!(ids(SortOrder::MostCommented), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_available_tags_sorted_unique() {
        let mut a = post("a", "a", "", 1);
        a.tags = vec!["web".to_string(), "rust".to_string()];
        let mut b = post("b", "b", "", 2);
        b.tags = vec!["rust".to_string()];
        assert_eq!(available_tags(&[a, b]), vec!["rust", "web"]);
    }

    #[test]
    fn test_cycles_wrap_back_to_all() {
        let mut c = None;
        for _ in 0..Category::ALL.len() {
            c = next_category(c);
            assert!(c.is_some());
        }
        assert_eq!(next_category(c), None);

        assert_eq!(next_status(None), Some(PostStatus::Draft));
        assert_eq!(next_status(Some(PostStatus::Archived)), None);
        assert_eq!(SortOrder::MostCommented.next(), SortOrder::Latest);
    }

    #[test]
    fn test_sort_parse_and_server_order() {
        assert_eq!(SortOrder::parse("popular"), Some(SortOrder::MostViewed));
        assert_eq!(SortOrder::parse("bogus"), None);
        assert_eq!(SortOrder::MostLiked.server_order().column, "likes_count");
        assert!(SortOrder::Oldest.server_order().ascending);
    }
}
