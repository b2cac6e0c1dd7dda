//! Optimistic toggles racing with change-feed events across every open list.

use chrono::{TimeZone, Utc};
use lumina::backend::realtime::{ChangeEvent, ChangeKind};
use lumina::backend::types::{Category, Post, PostStatus};
use lumina::feed::optimistic::ToggleKind;
use lumina::feed::query::{FeedQuery, SortOrder};
use lumina::feed::store::{Library, ListKind, ToggleRejected};
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;

fn post(id: &str, author: &str, likes: i64, day: u32) -> Post {
    Post {
        id: id.to_string(),
        title: format!("Post {}", id),
        content: "body".to_string(),
        excerpt: None,
        category: Category::Technology,
        status: PostStatus::Published,
        image_url: None,
        tags: vec!["rust".to_string()],
        author_id: author.to_string(),
        author: None,
        likes_count: likes,
        comments_count: 0,
        views_count: 0,
        created_at: Utc.with_ymd_and_hms(2024, 5, day, 9, 0, 0).unwrap(),
        updated_at: None,
    }
}

fn posts_update(id: &str, author: &str, status: &str, likes: i64) -> ChangeEvent {
    ChangeEvent {
        topic: "feed-posts".to_string(),
        table: "posts".to_string(),
        kind: ChangeKind::Update,
        record: json!({
            "id": id, "title": format!("Post {}", id), "content": "body",
            "category": "technology", "status": status, "author_id": author,
            "likes_count": likes, "tags": ["rust"], "created_at": "2024-05-01T09:00:00Z"
        }),
        old_record: json!({"id": id}),
        commit_timestamp: None,
    }
}

fn signed_in_library() -> Library {
    let mut lib = Library::new("me");
    let feed = vec![post("a", "other", 3, 1), post("b", "me", 0, 2)];
    let liked = HashSet::from(["a".to_string()]);
    lib.load(ListKind::Feed, feed, &liked, &HashSet::new());
    lib.load(ListKind::Mine, vec![post("b", "me", 0, 2)], &liked, &HashSet::new());
    lib
}

#[test]
fn test_like_from_feed_is_visible_in_my_posts() {
    let mut lib = signed_in_library();
    let ticket = lib.begin_toggle("b", ToggleKind::Like).unwrap();
    assert!(ticket.target);
    assert!(lib.is_pending("b", ToggleKind::Like));

    // Viewer state is shared: both lists read the same entry.
    assert!(lib.mine.contains("b"));
    assert_eq!(lib.viewer("b").like_count, 1);

    lib.settle("b", ToggleKind::Like, ticket.seq, true);
    assert!(lib.viewer("b").liked);
    assert!(!lib.is_pending("b", ToggleKind::Like));
}

#[test]
fn test_reload_during_pending_toggle_keeps_local_value() {
    let mut lib = signed_in_library();
    lib.begin_toggle("a", ToggleKind::Like).unwrap();
    assert_eq!(lib.viewer("a").like_count, 2);

    // A refetch lands before the unlike is written; the server still says liked.
    let liked = HashSet::from(["a".to_string()]);
    lib.load(ListKind::Feed, vec![post("a", "other", 3, 1)], &liked, &HashSet::new());
    assert!(!lib.viewer("a").liked);
    assert_eq!(lib.viewer("a").like_count, 2);
}

#[test]
fn test_foreign_likes_and_failed_write() {
    let mut lib = signed_in_library();
    let ticket = lib.begin_toggle("b", ToggleKind::Like).unwrap();

    // Two other readers like the post while our write is in flight.
    assert!(lib.apply_change(&posts_update("b", "me", "published", 2)));
    assert_eq!(lib.viewer("b").like_count, 3);

    lib.settle("b", ToggleKind::Like, ticket.seq, false);
    assert!(!lib.viewer("b").liked);
    assert_eq!(lib.viewer("b").like_count, 2);
}

#[test]
fn test_favorite_confirm_then_unfavorite() {
    let mut lib = signed_in_library();
    let add = lib.begin_toggle("a", ToggleKind::Favorite).unwrap();
    assert!(add.target);
    assert!(!lib.favorites.contains("a"));
    lib.settle("a", ToggleKind::Favorite, add.seq, true);
    assert!(lib.favorites.contains("a"));

    let remove = lib.begin_toggle("a", ToggleKind::Favorite).unwrap();
    assert!(!remove.target);
    lib.settle("a", ToggleKind::Favorite, remove.seq, true);
    assert!(!lib.favorites.contains("a"));
    assert!(lib.feed.contains("a"));
}

#[test]
fn test_like_and_favorite_pend_independently() {
    let mut lib = signed_in_library();
    lib.begin_toggle("a", ToggleKind::Like).unwrap();
    lib.begin_toggle("a", ToggleKind::Favorite).unwrap();
    assert_eq!(lib.pending_count(), 2);
    assert_eq!(
        lib.begin_toggle("a", ToggleKind::Favorite),
        Err(ToggleRejected::AlreadyPending("a".to_string()))
    );
}

#[test]
fn test_expired_toggle_ignores_late_result() {
    let mut lib = signed_in_library();
    let ticket = lib.begin_toggle("a", ToggleKind::Like).unwrap();
    std::thread::sleep(Duration::from_millis(5));
    let expired = lib.expire_pending(Duration::from_millis(1));
    assert_eq!(expired.len(), 1);
    assert!(lib.viewer("a").liked);
    assert_eq!(lib.viewer("a").like_count, 3);

    // The write finally came back; nothing is pending so nothing changes.
    assert!(lib.settle("a", ToggleKind::Like, ticket.seq, true).is_none());
    assert!(lib.viewer("a").liked);
}

#[test]
fn test_unpublishing_moves_post_out_of_feed_only() {
    let mut lib = signed_in_library();
    assert!(lib.apply_change(&posts_update("b", "me", "draft", 0)));
    assert!(!lib.feed.contains("b"));
    assert_eq!(lib.mine.get("b").map(|p| p.status), Some(PostStatus::Draft));
}

#[test]
fn test_view_applies_query_to_live_list() {
    let mut lib = signed_in_library();
    lib.insert_post(post("c", "me", 9, 3));
    let query = FeedQuery {
        sort: SortOrder::MostLiked,
        ..Default::default()
    };
    let ids: Vec<&str> = lib.feed.view(&query).iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["c", "a", "b"]);

    let search = FeedQuery {
        search: "POST A".to_string(),
        ..Default::default()
    };
    assert_eq!(lib.feed.view(&search).len(), 1);
}

#[test]
fn test_sign_out_clears_everything() {
    let mut lib = signed_in_library();
    lib.begin_toggle("a", ToggleKind::Favorite).unwrap();
    lib.clear();
    assert!(lib.feed.is_empty());
    assert!(lib.mine.is_empty());
    assert_eq!(lib.pending_count(), 0);
    assert_eq!(lib.viewer("a").like_count, 0);
}
