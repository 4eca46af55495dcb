use std::sync::OnceLock;

use ratatui::style::{Color, Modifier, Style};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThemeName {
    TokyoNight,
    #[default]
    CatppuccinMocha,
}

#[derive(Clone, Copy)]
pub struct Theme {
    // Base colors
    pub bg: Color,
    pub fg: Color,
    pub fg_dim: Color,

    // UI elements
    pub border_focused: Color,
    pub current_bg: Color,
    pub track: Color,

    // Accents
    pub accent: Color,
    pub buffered: Color,

    // Semantic colors
    pub playing: Color,
    pub paused: Color,
    pub info: Color,
    pub error: Color,
    pub title: Color,
}

impl Theme {
    pub const fn tokyo_night() -> Self {
        Self {
            // Base
            bg: Color::Rgb(26, 27, 38),      // #1a1b26
            fg: Color::Rgb(192, 202, 245),   // #c0caf5
            fg_dim: Color::Rgb(86, 95, 137), // #565f89

            // UI elements
            border_focused: Color::Rgb(187, 154, 247), // #bb9af7
            current_bg: Color::Rgb(61, 89, 161),       // #3d59a1
            track: Color::Rgb(41, 46, 66),             // #292e42

            // Accents
            accent: Color::Rgb(125, 207, 255),   // #7dcfff
            buffered: Color::Rgb(255, 158, 100), // #ff9e64

            // Semantic
            playing: Color::Rgb(158, 206, 106), // #9ece6a
            paused: Color::Rgb(224, 175, 104),  // #e0af68
            info: Color::Rgb(187, 154, 247),    // #bb9af7
            error: Color::Rgb(247, 118, 142),   // #f7768e
            title: Color::Rgb(122, 162, 247),   // #7aa2f7
        }
    }

    pub const fn catppuccin_mocha() -> Self {
        Self {
            // Base
            bg: Color::Rgb(30, 30, 46),         // #1e1e2e
            fg: Color::Rgb(205, 214, 244),      // #cdd6f4
            fg_dim: Color::Rgb(108, 112, 134),  // #6c7086

            // UI elements
            border_focused: Color::Rgb(203, 166, 247), // #cba6f7
            current_bg: Color::Rgb(137, 180, 250),     // #89b4fa
            track: Color::Rgb(49, 50, 68),             // #313244

            // Accents
            accent: Color::Rgb(148, 226, 213),   // #94e2d5
            buffered: Color::Rgb(250, 179, 135), // #fab387

            // Semantic
            playing: Color::Rgb(166, 227, 161), // #a6e3a1
            paused: Color::Rgb(249, 226, 175),  // #f9e2af
            info: Color::Rgb(203, 166, 247),    // #cba6f7
            error: Color::Rgb(243, 139, 168),   // #f38ba8
            title: Color::Rgb(137, 180, 250),   // #89b4fa
        }
    }

    // Computed styles
    pub fn border_style(&self, focused: bool) -> Style {
        Style::new().fg(if focused {
            self.border_focused
        } else {
            self.fg_dim
        })
    }

    pub fn current_style(&self) -> Style {
        Style::new()
            .bg(self.current_bg)
            .fg(self.bg)
            .add_modifier(Modifier::BOLD)
    }

    pub fn title_style(&self) -> Style {
        Style::new().fg(self.title).add_modifier(Modifier::BOLD)
    }

    pub fn label_style(&self) -> Style {
        Style::new().fg(self.fg_dim)
    }

    pub fn value_style(&self) -> Style {
        Style::new().fg(self.fg)
    }

    pub fn header_style(&self) -> Style {
        Style::new().fg(self.accent).add_modifier(Modifier::BOLD)
    }

    pub fn slider_color(&self, playing: bool) -> Color {
        if playing { self.playing } else { self.paused }
    }

    /// Blend from the background towards `color`; used for fades.
    pub fn fade(&self, color: Color, opacity: f64) -> Color {
        match (self.bg, color) {
            (Color::Rgb(br, bg, bb), Color::Rgb(r, g, b)) => {
                let mix = |from: u8, to: u8| {
                    (from as f64 + (to as f64 - from as f64) * opacity.clamp(0.0, 1.0)).round()
                        as u8
                };
                Color::Rgb(mix(br, r), mix(bg, g), mix(bb, b))
            }
            _ => color,
        }
    }
}

static THEME: OnceLock<Theme> = OnceLock::new();

pub fn init_theme(name: ThemeName) {
    let theme = match name {
        ThemeName::TokyoNight => Theme::tokyo_night(),
        ThemeName::CatppuccinMocha => Theme::catppuccin_mocha(),
    };
    let _ = THEME.set(theme);
}

pub fn get_theme() -> &'static Theme {
    THEME.get_or_init(Theme::catppuccin_mocha)
}
