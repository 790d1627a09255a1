//! Interactive state of the unit list: cursor, selection and status line.

use std::collections::BTreeSet;
use std::sync::Arc;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::widgets::ListState;
use tokio::sync::Mutex;
use tracing::{info, warn};

use targetctl_core::error::Error;
use targetctl_core::model::{ActiveState, MonotonicTime, UnitAction};
use targetctl_core::refresh::RefreshEvent;
use targetctl_core::tree::{ServiceNode, ServiceTree, TreeSummary};

/// Rows moved by PageUp/PageDown.
const PAGE: usize = 10;

/// Copy of one tree node taken under the lock, so rendering never holds it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row {
    pub name: String,
    pub state: ActiveState,
    pub state_changed: MonotonicTime,
    pub depth: usize,
}

impl From<&ServiceNode> for Row {
    fn from(node: &ServiceNode) -> Self {
        Self {
            name: node.name.clone(),
            state: node.state,
            state_changed: node.state_changed,
            depth: node.depth,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusMessage {
    Info(String),
    Error(String),
}

impl StatusMessage {
    pub fn text(&self) -> &str {
        match self {
            StatusMessage::Info(text) | StatusMessage::Error(text) => text,
        }
    }
}

/// What the event loop should do after a key press.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intent {
    Continue,
    Perform(UnitAction),
    Quit,
}

pub struct App {
    tree: Arc<Mutex<ServiceTree>>,
    pub root: Row,
    pub rows: Vec<Row>,
    pub summary: TreeSummary,
    selected: BTreeSet<String>,
    pub list_state: ListState,
    pub message: Option<StatusMessage>,
    dirty: bool,
    /// Set once the manager is unreachable; the event loop ends on it.
    fatal: Option<Error>,
}

impl App {
    pub async fn new(tree: Arc<Mutex<ServiceTree>>) -> Self {
        let (root, rows, summary) = {
            let guard = tree.lock().await;
            snapshot(&guard)
        };
        let mut list_state = ListState::default();
        if !rows.is_empty() {
            list_state.select(Some(0));
        }
        Self {
            tree,
            root,
            rows,
            summary,
            selected: BTreeSet::new(),
            list_state,
            message: None,
            dirty: false,
            fatal: None,
        }
    }

    /// Re-read the tree if a refresh changed it since the last sync.
    pub async fn sync(&mut self) {
        if !self.dirty {
            return;
        }
        let (root, rows, summary) = {
            let guard = self.tree.lock().await;
            snapshot(&guard)
        };
        self.root = root;
        self.rows = rows;
        self.summary = summary;
        self.dirty = false;
    }

    pub fn on_refresh(&mut self, event: RefreshEvent) {
        match event {
            RefreshEvent::Redraw => self.dirty = true,
            RefreshEvent::Failed(e) if !e.is_recoverable() => self.fatal = Some(e),
            RefreshEvent::Failed(e) => {
                self.message = Some(StatusMessage::Error(format!("Refresh failed: {}", e)));
            }
        }
    }

    pub fn take_fatal(&mut self) -> Option<Error> {
        self.fatal.take()
    }

    pub fn cursor(&self) -> usize {
        self.list_state.selected().unwrap_or(0)
    }

    pub fn is_selected(&self, unit: &str) -> bool {
        self.selected.contains(unit)
    }

    pub fn selected_count(&self) -> usize {
        self.selected.len()
    }

    pub fn on_key(&mut self, key: KeyEvent) -> Intent {
        self.message = None;
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return Intent::Quit,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Intent::Quit;
            }
            KeyCode::Enter | KeyCode::Char(' ') => self.toggle_current(),
            KeyCode::Char('a') => self.select_all_none(),
            KeyCode::Char('s') => return Intent::Perform(UnitAction::Start),
            KeyCode::Char('S') => return Intent::Perform(UnitAction::Stop),
            KeyCode::Char('r') => return Intent::Perform(UnitAction::Restart),
            KeyCode::Char('l') => return Intent::Perform(UnitAction::Reload),
            KeyCode::Up | KeyCode::Char('k') => self.move_cursor(-1),
            KeyCode::Down | KeyCode::Char('j') => self.move_cursor(1),
            KeyCode::PageUp => self.move_cursor(-(PAGE as isize)),
            KeyCode::PageDown => self.move_cursor(PAGE as isize),
            KeyCode::Home => self.move_cursor(isize::MIN),
            KeyCode::End => self.move_cursor(isize::MAX),
            _ => {}
        }
        Intent::Continue
    }

    fn move_cursor(&mut self, delta: isize) {
        if self.rows.is_empty() {
            self.list_state.select(None);
            return;
        }
        let last = self.rows.len() - 1;
        let next = self.cursor().saturating_add_signed(delta).min(last);
        self.list_state.select(Some(next));
    }

    fn toggle_current(&mut self) {
        let Some(row) = self.rows.get(self.cursor()) else {
            return;
        };
        if !self.selected.remove(&row.name) {
            self.selected.insert(row.name.clone());
        }
    }

    /// Select every row, or clear the selection if everything is selected.
    fn select_all_none(&mut self) {
        if self.selected.len() == self.rows.len() {
            self.selected.clear();
        } else {
            self.selected = self.rows.iter().map(|row| row.name.clone()).collect();
        }
    }

    /// Run `action` on each selected unit in list order. Every unit is
    /// attempted; the first failure is shown.
    pub async fn perform(&mut self, action: UnitAction) {
        if self.selected.is_empty() {
            self.message = Some(StatusMessage::Info("Nothing selected".to_string()));
            return;
        }
        let units: Vec<String> = self
            .rows
            .iter()
            .filter(|row| self.selected.contains(&row.name))
            .map(|row| row.name.clone())
            .collect();

        let mut failures = Vec::new();
        {
            let tree = self.tree.lock().await;
            for unit in &units {
                match tree.perform(action, unit).await {
                    Ok(()) => info!(unit = %unit, %action, "action requested"),
                    Err(e) if !e.is_recoverable() => {
                        warn!(unit = %unit, %action, error = %e, "lost the manager");
                        self.fatal = Some(e);
                        return;
                    }
                    Err(e) => {
                        warn!(unit = %unit, %action, error = %e, "action failed");
                        failures.push(e);
                    }
                }
            }
        }

        self.message = Some(match failures.split_first() {
            None => StatusMessage::Info(format!(
                "{} requested for {} unit{}",
                capitalize(action.verb()),
                units.len(),
                if units.len() == 1 { "" } else { "s" }
            )),
            Some((first, [])) => StatusMessage::Error(first.to_string()),
            Some((first, rest)) => {
                StatusMessage::Error(format!("{} (+{} more)", first, rest.len()))
            }
        });
    }
}

fn snapshot(tree: &ServiceTree) -> (Row, Vec<Row>, TreeSummary) {
    let root = Row::from(tree.root());
    let rows = tree.iter().skip(1).map(Row::from).collect();
    (root, rows, tree.summary())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use targetctl_core::client::UnitClient;
    use targetctl_core::fake::FakeManager;
    use targetctl_core::model::RelationKind;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    async fn app_with(manager: Arc<FakeManager>) -> App {
        let tree = ServiceTree::build(
            UnitClient::new(manager),
            "app.target",
            RelationKind::RequiredBy,
            1,
        )
        .await
        .unwrap();
        App::new(Arc::new(Mutex::new(tree))).await
    }

    fn manager() -> Arc<FakeManager> {
        let manager = FakeManager::new();
        manager.add_unit("app.target", "active", 1);
        manager.add_unit("web.service", "active", 2);
        manager.add_unit("db.service", "failed", 3);
        manager.add_unit("cache.service", "inactive", 4);
        manager.link(
            "app.target",
            RelationKind::RequiredBy,
            &["web.service", "db.service", "cache.service"],
        );
        Arc::new(manager)
    }

    #[tokio::test]
    async fn test_rows_exclude_root() {
        let app = app_with(manager()).await;
        assert_eq!(app.root.name, "app.target");
        let names: Vec<_> = app.rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["cache.service", "db.service", "web.service"]);
        assert_eq!(app.summary.failed, 1);
        assert_eq!(app.cursor(), 0);
    }

    #[tokio::test]
    async fn test_toggle_and_select_all() {
        let mut app = app_with(manager()).await;

        assert_eq!(app.on_key(key(KeyCode::Enter)), Intent::Continue);
        assert!(app.is_selected("cache.service"));
        app.on_key(key(KeyCode::Char(' ')));
        assert_eq!(app.selected_count(), 0);

        app.on_key(key(KeyCode::Char('a')));
        assert_eq!(app.selected_count(), 3);
        app.on_key(key(KeyCode::Char('a')));
        assert_eq!(app.selected_count(), 0);
    }

    #[tokio::test]
    async fn test_navigation_is_clamped() {
        let mut app = app_with(manager()).await;
        app.on_key(key(KeyCode::Up));
        assert_eq!(app.cursor(), 0);
        app.on_key(key(KeyCode::PageDown));
        assert_eq!(app.cursor(), 2);
        app.on_key(key(KeyCode::Home));
        assert_eq!(app.cursor(), 0);
        app.on_key(key(KeyCode::End));
        assert_eq!(app.cursor(), 2);
        app.on_key(key(KeyCode::Down));
        assert_eq!(app.cursor(), 2);
    }

    #[tokio::test]
    async fn test_action_keys_and_quit() {
        let mut app = app_with(manager()).await;
        assert_eq!(
            app.on_key(key(KeyCode::Char('S'))),
            Intent::Perform(UnitAction::Stop)
        );
        assert_eq!(
            app.on_key(key(KeyCode::Char('l'))),
            Intent::Perform(UnitAction::Reload)
        );
        assert_eq!(app.on_key(key(KeyCode::Esc)), Intent::Quit);
        assert_eq!(
            app.on_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Intent::Quit
        );
    }

    #[tokio::test]
    async fn test_nothing_selected() {
        let manager = manager();
        let mut app = app_with(manager.clone()).await;
        manager.clear_calls();

        app.perform(UnitAction::Start).await;
        assert_eq!(
            app.message,
            Some(StatusMessage::Info("Nothing selected".into()))
        );
        assert!(manager.calls().is_empty());
    }

    #[tokio::test]
    async fn test_perform_on_selection() {
        let manager = manager();
        let mut app = app_with(manager.clone()).await;
        manager.clear_calls();

        app.on_key(key(KeyCode::Char('a')));
        app.perform(UnitAction::Restart).await;
        assert_eq!(
            manager.calls(),
            vec![
                "RestartUnit cache.service",
                "RestartUnit db.service",
                "RestartUnit web.service",
            ]
        );
        assert_eq!(
            app.message,
            Some(StatusMessage::Info("Restart requested for 3 units".into()))
        );
    }

    #[tokio::test]
    async fn test_failed_action_is_reported_and_others_run() {
        let manager = manager();
        manager.deny("db.service", "Permission denied");
        let mut app = app_with(manager.clone()).await;
        manager.clear_calls();

        app.on_key(key(KeyCode::Char('a')));
        app.perform(UnitAction::Stop).await;
        assert_eq!(manager.calls().len(), 3);
        match &app.message {
            Some(StatusMessage::Error(text)) => assert!(text.contains("Permission denied")),
            other => panic!("unexpected message {:?}", other),
        }
        assert_eq!(manager.unit("web.service").unwrap().active_state, "inactive");
    }

    #[tokio::test]
    async fn test_refresh_events() {
        let manager = manager();
        let mut app = app_with(manager.clone()).await;

        app.on_refresh(RefreshEvent::Failed(Error::Protocol("boom".into())));
        assert_eq!(
            app.message,
            Some(StatusMessage::Error(
                "Refresh failed: unexpected reply: boom".into()
            ))
        );
        app.on_key(key(KeyCode::Down));
        assert_eq!(app.message, None);

        {
            let mut tree = app.tree.lock().await;
            manager.set_state("web.service", "failed", 99);
            assert!(tree.refresh().await.unwrap());
        }
        app.sync().await;
        assert_eq!(app.summary.failed, 1, "sync without a redraw event is a no-op");

        app.on_refresh(RefreshEvent::Redraw);
        app.sync().await;
        assert_eq!(app.summary.failed, 2);
        assert_eq!(app.take_fatal(), None);
    }

    #[tokio::test]
    async fn test_connection_loss_is_fatal() {
        let mut app = app_with(manager()).await;
        app.on_refresh(RefreshEvent::Failed(Error::Connection("connection closed".into())));
        assert_eq!(app.message, None);
        assert_eq!(
            app.take_fatal(),
            Some(Error::Connection("connection closed".into()))
        );
        assert_eq!(app.take_fatal(), None);

        let manager = manager();
        let mut app = app_with(manager.clone()).await;
        manager.disconnect();
        app.on_key(key(KeyCode::Char('a')));
        app.perform(UnitAction::Start).await;
        assert_eq!(
            app.take_fatal(),
            Some(Error::Connection("connection closed".into()))
        );
        assert_eq!(manager.unit("cache.service").unwrap().active_state, "inactive");
    }
}
