//! Colors and style helpers for the unit list.

use ratatui::style::{Color, Modifier, Style};

use targetctl_core::model::ActiveState;

#[derive(Clone, Debug)]
pub struct Palette {
    pub text: Color,
    pub text_muted: Color,
    pub border: Color,
    /// Active units
    pub active: Color,
    /// Inactive units (xterm grey 244)
    pub inactive: Color,
    /// Activating, deactivating and reloading units
    pub transitional: Color,
    /// Failed units and error messages
    pub failed: Color,
    pub key_hint: Color,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            text: Color::Reset,
            text_muted: Color::Rgb(100, 100, 100),
            border: Color::Rgb(60, 60, 60),
            active: Color::Green,
            inactive: Color::Indexed(244),
            transitional: Color::Yellow,
            failed: Color::Red,
            key_hint: Color::Rgb(206, 145, 120),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Theme {
    pub palette: Palette,
}

impl Theme {
    pub fn state_color(&self, state: ActiveState) -> Color {
        match state {
            ActiveState::Active => self.palette.active,
            ActiveState::Inactive => self.palette.inactive,
            ActiveState::Failed => self.palette.failed,
            ActiveState::Activating | ActiveState::Deactivating | ActiveState::Reloading => {
                self.palette.transitional
            }
        }
    }

    pub fn state_style(&self, state: ActiveState) -> Style {
        Style::default().fg(self.state_color(state))
    }

    /// The cursor row keeps its state color and is shown inverted.
    pub fn cursor_style(&self) -> Style {
        Style::default().add_modifier(Modifier::REVERSED)
    }

    pub fn title_style(&self, state: ActiveState) -> Style {
        self.state_style(state).add_modifier(Modifier::BOLD)
    }

    pub fn key_hint_style(&self) -> Style {
        Style::default()
            .fg(self.palette.key_hint)
            .add_modifier(Modifier::BOLD)
    }
}

static DEFAULT_THEME: std::sync::OnceLock<Theme> = std::sync::OnceLock::new();

pub fn theme() -> &'static Theme {
    DEFAULT_THEME.get_or_init(Theme::default)
}

pub mod styles {
    use super::*;

    pub fn state(state: ActiveState) -> Style {
        theme().state_style(state)
    }

    pub fn cursor() -> Style {
        theme().cursor_style()
    }

    pub fn title(state: ActiveState) -> Style {
        theme().title_style(state)
    }

    pub fn key_hint() -> Style {
        theme().key_hint_style()
    }

    pub fn text() -> Style {
        Style::default().fg(theme().palette.text)
    }

    pub fn text_muted() -> Style {
        Style::default().fg(theme().palette.text_muted)
    }

    pub fn border() -> Style {
        Style::default().fg(theme().palette.border)
    }

    pub fn success() -> Style {
        Style::default().fg(theme().palette.active)
    }

    pub fn error() -> Style {
        Style::default().fg(theme().palette.failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_colors() {
        let theme = Theme::default();
        assert_eq!(theme.state_color(ActiveState::Active), Color::Green);
        assert_eq!(theme.state_color(ActiveState::Inactive), Color::Indexed(244));
        assert_eq!(theme.state_color(ActiveState::Failed), Color::Red);
        for state in [
            ActiveState::Activating,
            ActiveState::Deactivating,
            ActiveState::Reloading,
        ] {
            assert_eq!(theme.state_color(state), Color::Yellow);
        }
    }
}
