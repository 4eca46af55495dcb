use std::time::Instant;

use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::Style,
    symbols::border,
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph},
};
use ratatui_image::StatefulImage;

use crate::{
    app::state::{App, VisualStatus},
    media::element::MediaElement,
    player::time::format_time,
    ui::{
        controls::{ControlWidgetSet, Indicator},
        notifications::NotificationLevel,
        theme::get_theme,
        visual::ImageCache,
    },
};

const ROUNDED_BORDER: border::Set = border::ROUNDED;
const VOLUME_WIDTH: u16 = 20;

fn block_with_title(title: &'_ str) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .border_set(ROUNDED_BORDER)
        .title(title)
}

pub fn render(f: &mut Frame, app: &mut App, image_cache: &mut ImageCache) {
    let theme = get_theme();
    let area = f.area();

    let background = Block::default().style(Style::default().bg(theme.bg));
    f.render_widget(background, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(area);

    draw_header(f, chunks[0], app);
    draw_main_content(f, chunks[1], app, image_cache);
    draw_footer(f, chunks[2]);
    draw_notifications(f, area, app);
}

fn draw_header(f: &mut Frame, area: Rect, app: &App) {
    let theme = get_theme();
    let mut spans = vec![Span::styled("Spectroseek", theme.header_style())];
    if let Some(location) = app.current_location() {
        spans.push(Span::styled(" · ", theme.label_style()));
        spans.push(Span::styled(location.display_name(), theme.title_style()));
    }
    let header = Paragraph::new(Line::from(spans))
        .block(block_with_title(" ♫ ").border_style(theme.border_style(false)))
        .centered();
    f.render_widget(header, area);
}

fn draw_main_content(f: &mut Frame, area: Rect, app: &mut App, image_cache: &mut ImageCache) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(30), Constraint::Percentage(70)])
        .split(area);

    app.layout_regions.playlist = Some(chunks[0]);

    draw_playlist(f, chunks[0], app);
    draw_player(f, chunks[1], app, image_cache);
}

fn draw_playlist(f: &mut Frame, area: Rect, app: &App) {
    let theme = get_theme();

    let items: Vec<ListItem> = app
        .playlist
        .iter()
        .enumerate()
        .map(|(i, location)| {
            let is_current = i == app.current_index;
            let prefix = if is_current { "▶ " } else { "  " };
            let text = format!("{}{:02}. {}", prefix, i + 1, location.display_name());
            let style = if is_current {
                theme.current_style()
            } else {
                theme.value_style()
            };
            ListItem::new(text).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(block_with_title(" ● Playlist ").border_style(theme.border_style(false)))
        .highlight_spacing(ratatui::widgets::HighlightSpacing::Always);

    let mut list_state =
        ratatui::widgets::ListState::default().with_selected(Some(app.current_index));
    f.render_stateful_widget(list, area, &mut list_state);
}

fn draw_player(f: &mut Frame, area: Rect, app: &mut App, image_cache: &mut ImageCache) {
    let theme = get_theme();
    let block = block_with_title(" ● Spectrogram ").border_style(theme.border_style(true));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(0),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .split(inner);
    let (image_area, buffered_row, seek_row, controls_row) =
        (chunks[0], chunks[1], chunks[2], chunks[3]);

    let regions = &mut app.layout_regions;
    regions.visualization = None;
    regions.seek_row = None;
    regions.play_pause = None;
    regions.volume = None;
    regions.native_bar = None;

    app.sync_visualization_width(image_area.width);

    let native_visible = app
        .player
        .as_ref()
        .is_some_and(|p| p.media().native_controls_visible());

    match (app.visual_status, image_cache.protocol_for(image_area)) {
        (VisualStatus::Ready, Some(protocol)) => {
            f.render_stateful_widget(StatefulImage::default(), image_area, protocol);
            app.layout_regions.visualization = Some(image_area);
            app.layout_regions.seek_row = Some(seek_row);
        }
        (VisualStatus::Failed, _) => draw_centered(f, image_area, "No spectrogram available"),
        _ => draw_centered(f, image_area, "Rendering spectrogram..."),
    }

    let Some(player) = app.player.as_ref() else {
        return;
    };

    if native_visible {
        let media = player.media();
        app.layout_regions.native_bar = Some(seek_row);
        draw_progress_bar(
            f,
            seek_row,
            media.current_time(),
            media.duration(),
            !media.paused(),
        );
        return;
    }

    let Some(controls) = player.controls() else {
        return;
    };
    let playing = player.state().is_playing();

    draw_buffered(f, buffered_row, controls);
    draw_playhead(f, seek_row, controls, playing);

    let row = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(5),
            Constraint::Length(VOLUME_WIDTH),
        ])
        .split(controls_row);

    f.render_widget(
        Paragraph::new(controls.play_pause.glyph().symbol())
            .style(Style::new().fg(theme.slider_color(playing))),
        row[0],
    );
    f.render_widget(
        Paragraph::new(controls.time_label.text.as_str()).style(theme.value_style()),
        row[2],
    );
    f.render_widget(Paragraph::new("Vol ").style(theme.label_style()), row[3]);
    draw_volume(f, row[4], controls.volume.value());

    app.layout_regions.play_pause = Some(row[0]);
    app.layout_regions.volume = Some(row[4]);
}

fn draw_centered(f: &mut Frame, area: Rect, text: &str) {
    let theme = get_theme();
    if area.height == 0 {
        return;
    }
    let text_area = Rect {
        x: area.x,
        y: area.y + area.height / 2,
        width: area.width,
        height: 1,
    };
    f.render_widget(
        Paragraph::new(text)
            .alignment(Alignment::Center)
            .style(theme.label_style()),
        text_area,
    );
}

/// One cell per column; an indicator lights every column it overlaps.
fn draw_buffered(f: &mut Frame, area: Rect, controls: &ControlWidgetSet) {
    let theme = get_theme();
    let now = Instant::now();
    let indicators: Vec<&Indicator> = controls
        .buffered
        .retiring()
        .iter()
        .chain(controls.buffered.live())
        .collect();

    let buf = f.buffer_mut();
    for indicator in indicators {
        let opacity = indicator.opacity(now);
        if opacity <= 0.0 {
            continue;
        }
        let color = theme.fade(theme.buffered, opacity);
        let first = indicator.left.floor().max(0.0) as u16;
        let last = ((indicator.left + indicator.width).ceil() as u16).min(area.width);

        for col in first..last {
            if let Some(cell) = buf.cell_mut((area.x + col, area.y)) {
                cell.set_symbol("▀").set_fg(color);
            }
        }
    }
}

fn draw_playhead(f: &mut Frame, area: Rect, controls: &ControlWidgetSet, playing: bool) {
    let theme = get_theme();
    let width = area.width as usize;
    let filled = (controls.playhead.width.round().max(0.0) as usize).min(width);

    let spans = vec![
        Span::styled("━".repeat(filled), Style::new().fg(theme.slider_color(playing))),
        Span::styled("─".repeat(width - filled), Style::new().fg(theme.track)),
    ];
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_volume(f: &mut Frame, area: Rect, volume: f64) {
    let theme = get_theme();
    let width = area.width as usize;
    let filled = ((volume * width as f64).round() as usize).min(width);

    let spans = vec![
        Span::styled("━".repeat(filled), Style::new().fg(theme.accent)),
        Span::styled("─".repeat(width - filled), Style::new().fg(theme.fg_dim)),
    ];
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

/// Plain progress bar used while the custom controls are unavailable.
fn draw_progress_bar(f: &mut Frame, area: Rect, current: f64, total: f64, playing: bool) {
    let theme = get_theme();
    let progress_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(8),
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
            Constraint::Length(8),
        ])
        .split(area);

    let known = total.is_finite() && total > 0.0;
    let progress = if known {
        (current / total).clamp(0.0, 1.0)
    } else {
        0.0
    };

    f.render_widget(
        Paragraph::new(format_time(current))
            .alignment(Alignment::Right)
            .style(theme.value_style()),
        progress_chunks[0],
    );

    let slider_width = progress_chunks[2].width as usize;
    let filled = ((progress * slider_width as f64) as usize).min(slider_width);
    let slider_color = theme.slider_color(playing);

    let mut slider = String::new();
    for i in 0..slider_width {
        if i < filled.saturating_sub(1) {
            slider.push('━');
        } else if i == filled.saturating_sub(1) || (filled == 0 && i == 0) {
            slider.push('●');
        } else {
            slider.push('─');
        }
    }

    let slider_spans = vec![
        Span::styled(
            slider.chars().take(filled).collect::<String>(),
            Style::new().fg(slider_color),
        ),
        Span::styled(
            slider.chars().skip(filled).collect::<String>(),
            Style::new().fg(theme.fg_dim),
        ),
    ];
    f.render_widget(Paragraph::new(Line::from(slider_spans)), progress_chunks[2]);

    let total_text = if known {
        format_time(total)
    } else {
        "--:--".to_string()
    };
    f.render_widget(
        Paragraph::new(total_text)
            .alignment(Alignment::Left)
            .style(theme.value_style()),
        progress_chunks[4],
    );
}

fn draw_footer(f: &mut Frame, area: Rect) {
    let theme = get_theme();
    let keybinds =
        "Space: Play/Pause | ←→: Prev/Next | h/l: Seek | +/-: Volume | Click: Seek | q: Quit";

    f.render_widget(
        Paragraph::new(keybinds)
            .style(theme.label_style())
            .block(block_with_title("").border_style(theme.border_style(false))),
        area,
    );
}

fn draw_notifications(f: &mut Frame, area: Rect, app: &App) {
    let theme = get_theme();
    let active = app.notifications.active_notifications();
    if active.is_empty() {
        return;
    }

    let width = area.width.min(60);
    let height = (active.len() as u16 + 2).min(area.height);
    let popup = Rect {
        x: area.x + area.width - width,
        y: area.y,
        width,
        height,
    };

    let lines: Vec<Line> = active
        .iter()
        .map(|n| {
            let color = match n.level {
                NotificationLevel::Info => theme.info,
                NotificationLevel::Warning => theme.paused,
                NotificationLevel::Error => theme.error,
            };
            Line::from(vec![
                Span::styled(format!("{} ", n.level.prefix()), Style::new().fg(color)),
                Span::styled(n.text.as_str(), theme.value_style()),
            ])
        })
        .collect();

    f.render_widget(Clear, popup);
    f.render_widget(
        Paragraph::new(lines)
            .style(Style::default().bg(theme.bg))
            .block(block_with_title(" Notifications ").border_style(theme.border_style(true))),
        popup,
    );
}
