pub mod app;
pub mod theme;
pub mod view;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use crossterm::{
    event::{self, Event as CEvent, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tokio::sync::{Mutex, mpsc};
use tracing::info;

use targetctl_core::refresh::{RefreshEngine, RefreshEvent, RefreshSettings};
use targetctl_core::tree::ServiceTree;

use app::{App, Intent};

type Term = Terminal<CrosstermBackend<io::Stdout>>;

// --- Terminal setup/teardown ---
fn setup_terminal() -> io::Result<Term> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

fn restore_terminal(terminal: &mut Term) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Show `tree` until the user quits, refreshing it in the background.
/// Ends with an error if the manager becomes unreachable.
pub async fn run(tree: ServiceTree, settings: RefreshSettings) -> anyhow::Result<()> {
    let tree = Arc::new(Mutex::new(tree));
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let engine = RefreshEngine::spawn(tree.clone(), settings, event_tx);
    let app = App::new(tree).await;

    let mut terminal = setup_terminal().context("terminal error")?;
    let result = event_loop(&mut terminal, app, event_rx).await;
    let restored = restore_terminal(&mut terminal).context("terminal error");

    engine.shutdown().await;
    info!("ui closed");
    result.and(restored)
}

async fn event_loop(
    terminal: &mut Term,
    mut app: App,
    mut events: mpsc::UnboundedReceiver<RefreshEvent>,
) -> anyhow::Result<()> {
    loop {
        while let Ok(event) = events.try_recv() {
            app.on_refresh(event);
        }
        if let Some(e) = app.take_fatal() {
            return Err(anyhow!(e).context("lost the service manager"));
        }
        app.sync().await;

        // Redrawn every pass; uptimes move without refresh events.
        terminal
            .draw(|f| view::draw(f, &mut app))
            .context("terminal error")?;

        if !event::poll(Duration::from_millis(50)).context("terminal error")? {
            continue;
        }
        let CEvent::Key(key) = event::read().context("terminal error")? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match app.on_key(key) {
            Intent::Continue => {}
            Intent::Quit => return Ok(()),
            Intent::Perform(action) => app.perform(action).await,
        }
    }
}
