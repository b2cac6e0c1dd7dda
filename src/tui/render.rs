use std::borrow::Cow;

use super::state::{AppState, PostRow, Screen, ScreenList};
use super::{ComposeField, Mode, ProfileField, ProfileForm, UiState};
use crate::backend::types::SettingKey;
use crate::feed::store::ListKind;
use crate::routes::AuthState;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, Tabs, Wrap},
    Frame,
};

pub fn draw(f: &mut Frame, state: &AppState, ui: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(6),
            Constraint::Length(1),
        ])
        .split(f.area());

    draw_header(f, state, ui, chunks[0]);
    match ui.screen {
        Screen::Feed => draw_list_screen(f, state, ui, ListKind::Feed, chunks[1]),
        Screen::MyPosts => draw_list_screen(f, state, ui, ListKind::Mine, chunks[1]),
        Screen::Favorites => draw_list_screen(f, state, ui, ListKind::Favorites, chunks[1]),
        Screen::Profile => draw_profile(f, state, ui, chunks[1]),
        Screen::Compose => draw_compose(f, state, ui, chunks[1]),
    }
    draw_logs(f, state, chunks[2]);
    draw_footer(f, ui, chunks[3]);
}

fn draw_header(f: &mut Frame, state: &AppState, ui: &UiState, area: Rect) {
    let halves = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(40), Constraint::Length(48)])
        .split(area);

    let titles: Vec<Line> = Screen::ALL.iter().map(|s| Line::from(s.title())).collect();
    let selected = Screen::ALL.iter().position(|s| *s == ui.screen).unwrap_or(0);
    let tabs = Tabs::new(titles)
        .select(selected)
        .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        .block(Block::default().title(" Lumina ").borders(Borders::ALL));
    f.render_widget(tabs, halves[0]);

    let who = match state.auth {
        AuthState::SignedIn => Span::styled(
            state.user_label.clone().unwrap_or_default(),
            Style::default().fg(Color::Green),
        ),
        AuthState::SignedOut => Span::styled("guest", Style::default().fg(Color::Yellow)),
        AuthState::Loading => Span::styled("...", Style::default().fg(Color::DarkGray)),
    };
    let live = if state.realtime_connected {
        Span::styled("LIVE", Style::default().fg(Color::Green))
    } else {
        Span::styled("OFFLINE", Style::default().fg(Color::Red))
    };
    let mut spans = vec![Span::raw(" "), who, Span::raw("  "), live];
    if state.pending_writes > 0 {
        spans.push(Span::styled(
            format!("  {} saving", state.pending_writes),
            Style::default().fg(Color::Yellow),
        ));
    }
    spans.push(Span::styled(
        format!("  {}", state.uptime()),
        Style::default().fg(Color::DarkGray),
    ));
    let status = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));
    f.render_widget(status, halves[1]);
}

fn filter_summary(list: &ScreenList, mode: &Mode) -> Line<'static> {
    let q = &list.query;
    let search = match mode {
        Mode::Search(text) => format!("/{}_", text),
        _ if q.search.is_empty() => "-".to_string(),
        _ => q.search.clone(),
    };
    let dim = Style::default().fg(Color::DarkGray);
    let val = Style::default().fg(Color::Cyan);
    Line::from(vec![
        Span::styled(" search ", dim),
        Span::styled(search, val),
        Span::styled("  category ", dim),
        Span::styled(q.category.map_or("all", |c| c.as_str()).to_string(), val),
        Span::styled("  status ", dim),
        Span::styled(q.status.map_or("any", |s| s.as_str()).to_string(), val),
        Span::styled("  tag ", dim),
        Span::styled(q.tags.first().cloned().unwrap_or_else(|| "-".to_string()), val),
        Span::styled("  sort ", dim),
        Span::styled(q.sort.label().to_string(), val),
    ])
}

fn draw_list_screen(f: &mut Frame, state: &AppState, ui: &UiState, kind: ListKind, area: Rect) {
    let list = state.list(kind);
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(4), Constraint::Length(5)])
        .split(area);

    f.render_widget(Paragraph::new(filter_summary(list, &ui.mode)), chunks[0]);

    if list.rows.is_empty() {
        let message = if !list.loaded {
            "Loading..."
        } else if list.total > 0 {
            "No posts match the current filters"
        } else {
            match kind {
                ListKind::Feed => "No posts yet",
                ListKind::Mine => "You have not written anything yet. Press [n] to start.",
                ListKind::Favorites => "No favorites yet. Press [f] on a post to save it.",
            }
        };
        let para = Paragraph::new(vec![Line::from(""), Line::from(message)])
            .alignment(Alignment::Center)
            .block(Block::default().title(list_title(kind, list)).borders(Borders::ALL));
        f.render_widget(para, chunks[1]);
        return;
    }

    let selected = ui.selected(kind);
    draw_posts(f, list, selected, kind, chunks[1]);
    if let Some(row) = list.rows.get(selected) {
        draw_post_detail(f, row, chunks[2]);
    }
}

fn list_title(kind: ListKind, list: &ScreenList) -> String {
    let name = match kind {
        ListKind::Feed => "Feed",
        ListKind::Mine => "My Posts",
        ListKind::Favorites => "Favorites",
    };
    if list.rows.len() == list.total {
        format!(" {} [{}] ", name, list.total)
    } else {
        format!(" {} [{}/{}] ", name, list.rows.len(), list.total)
    }
}

fn draw_posts(f: &mut Frame, list: &ScreenList, selected: usize, kind: ListKind, area: Rect) {
    let inner_width = area.width.saturating_sub(2) as usize;
    let show_status = kind == ListKind::Mine;
    let fixed = 14 + 11 + 7 + 5 + 4 + if show_status { 10 } else { 0 };
    let title_w = inner_width.saturating_sub(fixed).max(10);

    let mut headers = vec!["Title", "Author", "Category", "Likes", "Cmt", ""];
    let mut constraints = vec![
        Constraint::Length(title_w as u16),
        Constraint::Length(14),
        Constraint::Length(11),
        Constraint::Length(7),
        Constraint::Length(5),
        Constraint::Length(4),
    ];
    if show_status {
        headers.push("Status");
        constraints.push(Constraint::Length(10));
    }

    let visible = area.height.saturating_sub(3) as usize;
    let offset = selected.saturating_sub(visible.saturating_sub(1));

    let rows: Vec<Row> = list
        .rows
        .iter()
        .enumerate()
        .skip(offset)
        .take(visible)
        .map(|(i, post)| {
            let like_style = if post.liked {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };
            let heart = if post.liked { "\u{2665}" } else { "\u{2661}" };
            let mut marks = String::new();
            if post.favorited {
                marks.push('\u{2605}');
            }
            if post.pending {
                marks.push('~');
            }
            let mut cells = vec![
                Cell::from(truncate_with_ellipsis(&post.title, title_w).into_owned()),
                Cell::from(truncate_with_ellipsis(&post.author, 13).into_owned()),
                Cell::from(post.category.as_str()),
                Cell::from(format!("{} {}", heart, post.like_count)).style(like_style),
                Cell::from(post.comments.to_string()),
                Cell::from(marks).style(Style::default().fg(Color::Yellow)),
            ];
            if show_status {
                cells.push(Cell::from(post.status.as_str()));
            }
            let row = Row::new(cells);
            if i == selected {
                row.style(Style::default().add_modifier(Modifier::REVERSED))
            } else {
                row
            }
        })
        .collect();

    let header = Row::new(headers).style(Style::default().add_modifier(Modifier::BOLD));
    let table = Table::new(rows, constraints)
        .header(header)
        .block(Block::default().title(list_title(kind, list)).borders(Borders::ALL));
    f.render_widget(table, area);
}

fn draw_post_detail(f: &mut Frame, row: &PostRow, area: Rect) {
    let tags = if row.tags.is_empty() {
        String::new()
    } else {
        row.tags.iter().map(|t| format!("#{}", t)).collect::<Vec<_>>().join(" ")
    };
    let lines = vec![
        Line::from(vec![
            Span::styled(row.created.clone(), Style::default().fg(Color::DarkGray)),
            Span::raw("  "),
            Span::styled(format!("{} views", row.views), Style::default().fg(Color::DarkGray)),
            Span::raw("  "),
            Span::styled(tags, Style::default().fg(Color::Cyan)),
        ]),
        Line::from(row.excerpt.clone()),
    ];
    let para = Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().title(format!(" {} ", row.title)).borders(Borders::ALL));
    f.render_widget(para, area);
}

fn draw_profile(f: &mut Frame, state: &AppState, ui: &UiState, area: Rect) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);
    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(6), Constraint::Length(SettingKey::ALL.len() as u16 + 2)])
        .split(columns[0]);

    let dim = Style::default().fg(Color::DarkGray);
    let lines = match &state.profile {
        None => vec![Line::from(Span::styled("Loading profile...", dim))],
        Some(view) => {
            let p = &view.profile;
            let date = |d: Option<chrono::DateTime<chrono::Utc>>| {
                d.map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "-".to_string())
            };
            vec![
                Line::from(Span::styled(
                    p.full_name.clone().or_else(|| p.username.clone()).unwrap_or_default(),
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(Span::styled(
                    format!("@{}", p.username.as_deref().unwrap_or("")),
                    dim,
                )),
                Line::from(p.bio.clone().unwrap_or_default()),
                Line::from(vec![
                    Span::styled("email ", dim),
                    Span::raw(view.email.clone().unwrap_or_default()),
                ]),
                Line::from(vec![
                    Span::styled("joined ", dim),
                    Span::raw(date(view.joined_at)),
                    Span::styled("  last sign-in ", dim),
                    Span::raw(date(view.last_sign_in_at)),
                ]),
                Line::from(vec![
                    Span::styled(view.stats.posts.to_string(), Style::default().fg(Color::Cyan)),
                    Span::styled(" posts  ", dim),
                    Span::styled(view.stats.followers.to_string(), Style::default().fg(Color::Cyan)),
                    Span::styled(" followers  ", dim),
                    Span::styled(view.stats.following.to_string(), Style::default().fg(Color::Cyan)),
                    Span::styled(" following", dim),
                ]),
            ]
        }
    };
    match &ui.mode {
        Mode::EditProfile(form) => draw_profile_form(f, form, left[0]),
        _ => {
            let para = Paragraph::new(lines)
                .wrap(Wrap { trim: true })
                .block(Block::default().title(" Profile ").borders(Borders::ALL));
            f.render_widget(para, left[0]);
        }
    }

    let setting_lines: Vec<Line> = SettingKey::ALL
        .iter()
        .enumerate()
        .map(|(i, key)| {
            let on = state.settings.get(*key);
            let mark = if on {
                Span::styled("[x] ", Style::default().fg(Color::Green))
            } else {
                Span::styled("[ ] ", dim)
            };
            let label = Span::raw(key.label());
            let line = Line::from(vec![mark, label]);
            if i == ui.setting_cursor {
                line.style(Style::default().add_modifier(Modifier::REVERSED))
            } else {
                line
            }
        })
        .collect();
    let title = if state.settings_dirty {
        " Settings (unsaved) "
    } else {
        " Settings "
    };
    f.render_widget(
        Paragraph::new(setting_lines).block(Block::default().title(title).borders(Borders::ALL)),
        left[1],
    );

    let notes: Vec<Line> = if state.notifications.is_empty() {
        vec![Line::from(Span::styled("Nothing new", dim))]
    } else {
        state
            .notifications
            .iter()
            .map(|n| {
                Line::from(vec![
                    Span::styled(format!("{} ", n.time), dim),
                    Span::raw(n.message.clone()),
                ])
            })
            .collect()
    };
    f.render_widget(
        Paragraph::new(notes).block(Block::default().title(" Notifications ").borders(Borders::ALL)),
        columns[1],
    );
}

fn form_line(label: &str, value: String, active: bool, text: bool) -> Line<'static> {
    let label_style = if active {
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let cursor = if active && text { "_" } else { "" };
    Line::from(vec![
        Span::styled(format!(" {:<11}", label), label_style),
        Span::raw(value),
        Span::styled(cursor, Style::default().fg(Color::Cyan)),
    ])
}

fn draw_profile_form(f: &mut Frame, form: &ProfileForm, area: Rect) {
    let lines: Vec<Line> = ProfileField::ALL
        .iter()
        .map(|field| form_line(field.label(), form.value(*field).to_string(), form.field == *field, true))
        .collect();
    let para = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().title(" Edit Profile ").borders(Borders::ALL));
    f.render_widget(para, area);
}

fn draw_compose(f: &mut Frame, state: &AppState, ui: &UiState, area: Rect) {
    let form = &ui.compose;
    let mut lines = Vec::new();
    for field in ComposeField::ALL {
        let active = form.field == field;
        let value = match field {
            ComposeField::Title => form.title.clone(),
            ComposeField::Content => {
                let n = form.content.lines().count();
                let first = form.content.lines().last().unwrap_or("").to_string();
                if n > 1 {
                    format!("({} lines) ...{}", n, first)
                } else {
                    first
                }
            }
            ComposeField::Category => form
                .category
                .map_or("< choose >".to_string(), |c| format!("< {} >", c.as_str())),
            ComposeField::Tags => form.tags.clone(),
            ComposeField::Status => format!("< {} >", form.status.as_str()),
            ComposeField::Image if form.editing.is_some() && form.image_path.is_empty() => {
                "(keep current image)".to_string()
            }
            ComposeField::Image => form.image_path.clone(),
        };
        let text = !matches!(field, ComposeField::Category | ComposeField::Status);
        lines.push(form_line(field.label(), value, active, text));
        if field == ComposeField::Tags && !state.known_tags.is_empty() {
            lines.push(Line::from(Span::styled(
                format!("             used before: {}", state.known_tags.join(", ")),
                Style::default().fg(Color::DarkGray),
            )));
        }
        lines.push(Line::from(""));
    }
    let title = if form.editing.is_some() { " Edit Post " } else { " New Post " };
    let para = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().title(title).borders(Borders::ALL));
    f.render_widget(para, area);
}

fn draw_logs(f: &mut Frame, state: &AppState, area: Rect) {
    let max_width = area.width.saturating_sub(2) as usize; // borders
    let visible_lines = area.height.saturating_sub(2) as usize;

    let lines: Vec<Line> = state
        .logs
        .iter()
        .rev()
        .take(visible_lines)
        .map(|l| {
            let color = match l.level.as_str() {
                "ERROR" => Color::Red,
                "WARN" => Color::Yellow,
                _ => Color::DarkGray,
            };
            let prefix = format!(" {} [{}] ", l.time, l.level);
            let msg_max = max_width.saturating_sub(prefix.len());
            let msg = truncate_with_ellipsis(&l.message, msg_max);
            Line::from(vec![
                Span::styled(prefix, Style::default().fg(color)),
                Span::raw(msg.into_owned()),
            ])
        })
        .collect();

    let block = Block::default().title(" Activity ").borders(Borders::ALL);
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn key_hint(key: &'static str, rest: &'static str) -> [Span<'static>; 2] {
    [
        Span::styled(key, Style::default().fg(Color::Yellow)),
        Span::raw(rest),
    ]
}

fn draw_footer(f: &mut Frame, ui: &UiState, area: Rect) {
    if let Some(flash) = &ui.flash {
        let line = Line::from(Span::styled(format!("  {}", flash), Style::default().fg(Color::Yellow)));
        f.render_widget(Paragraph::new(line), area);
        return;
    }
    let hints: Vec<[Span; 2]> = match (&ui.mode, ui.screen) {
        (Mode::Search(_), _) => vec![key_hint("  [Enter/Esc]", " done  ")],
        (Mode::ConfirmDelete(_), _) => vec![key_hint("  Delete this post? [y]", "es / any key to cancel")],
        (Mode::EditProfile(_), _) => vec![
            key_hint("  [Tab]", " next field  "),
            key_hint("[Ctrl+S]", " save  "),
            key_hint("[Esc]", " cancel  "),
        ],
        (_, Screen::Compose) => vec![
            key_hint("  [Tab]", " next field  "),
            key_hint("[\u{2190}/\u{2192}]", " choose  "),
            key_hint("[Ctrl+S]", " publish  "),
            key_hint("[Esc]", " cancel  "),
        ],
        (_, Screen::Profile) => vec![
            key_hint("  [j/k]", " move  "),
            key_hint("[Space]", " toggle  "),
            key_hint("[w]", " save settings  "),
            key_hint("[e]", "dit profile  "),
            key_hint("[o]", " sign out  "),
            key_hint("[q]", "uit  "),
        ],
        _ => vec![
            key_hint("  [1-4]", " screens  "),
            key_hint("[n]", "ew  "),
            key_hint("[Enter]", " open  "),
            key_hint("[e]", "dit  "),
            key_hint("[l]", "ike  "),
            key_hint("[f]", "av  "),
            key_hint("[/]", " search  "),
            key_hint("[c]", "ategory  "),
            key_hint("[t]", "ag  "),
            key_hint("[s]", "ort  "),
            key_hint("[x]", " clear  "),
            key_hint("[q]", "uit  "),
        ],
    };
    let spans: Vec<Span> = hints.into_iter().flatten().collect();
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn truncate_with_ellipsis(s: &str, max_width: usize) -> Cow<'_, str> {
    let char_count = s.chars().count();
    if char_count <= max_width {
        Cow::Borrowed(s)
    } else if max_width <= 3 {
        Cow::Owned(".".repeat(max_width))
    } else {
        let end = s
            .char_indices()
            .nth(max_width - 3)
            .map(|(i, _)| i)
            .unwrap_or(s.len());
        Cow::Owned(format!("{}...", &s[..end]))
    }
}
