use chain_watch::{
    chain::{self, StrikeRow},
    config::Config,
    creds::Creds,
    poller::{ChainFrame, ChainView, LiveSwitch, PollSettings, Poller},
    store::{SnapshotStore, read_latest},
    table::{BOARD_COLUMNS, NO_DATA, board_cells, cell},
    upstox::UpstoxClient,
    upstox_dir,
};
use chrono::NaiveDate;
use ratatui::{
    DefaultTerminal, Frame,
    crossterm::event::{self, Event, KeyCode, KeyEventKind},
    layout::{Constraint, Layout},
    style::Stylize,
    widgets::{Block, List, ListItem, Paragraph, Row, Table},
};
use rustls::crypto::CryptoProvider;
use std::fs::{self, File};
use std::io;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const BOARD_LOG: &str = "board.log";
const LOG_LINES: usize = 100;
const INPUT_POLL: Duration = Duration::from_millis(200);

/// What the screen shows, published by the poll task.
#[derive(Debug, Clone, Default)]
struct Board {
    instrument_key: String,
    expiry: Option<NaiveDate>,
    timestamp: Option<String>,
    rows: Vec<StrikeRow>,
    log: Vec<String>,
}

struct BoardView {
    tx: watch::Sender<Board>,
}

impl ChainView for BoardView {
    fn render(&mut self, frame: ChainFrame<'_>) {
        self.tx.send_modify(|board| {
            board.expiry = Some(frame.expiry);
            board.timestamp = Some(frame.snapshot.timestamp_utc.clone());
            board.rows = frame.rows.to_vec();
        });
    }

    fn log(&mut self, entry: &str) {
        self.tx.send_modify(|board| {
            board.log.insert(0, entry.to_string());
            board.log.truncate(LOG_LINES);
        });
    }
}

enum Command {
    Run,
    FetchOnce,
}

#[tokio::main]
async fn main() {
    CryptoProvider::install_default(rustls::crypto::aws_lc_rs::default_provider())
        .expect("Failed to install default crypto provider");

    if let Err(e) = init_logging() {
        eprintln!("Could not open {BOARD_LOG}: {e}");
        return;
    }

    let config = match Config::new().await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config error: {e:#}");
            return;
        }
    };

    let creds = Creds::load(&config.token_file).await;
    let client = match UpstoxClient::new(&config.base_url, creds) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Failed to create client: {e}");
            return;
        }
    };

    let mut board = Board {
        instrument_key: config.instrument_key.clone(),
        expiry: config.expiry,
        ..Board::default()
    };
    if !client.has_credentials() {
        board.log.push(format!("Token file not found: {:?}", config.token_file));
    }
    match read_latest(&config.latest_file) {
        Ok(Some(latest)) => {
            board.rows = chain::to_rows(&latest.snapshot);
            board.timestamp = Some(latest.timestamp_utc);
        }
        Ok(None) => board
            .log
            .push("No latest snapshot file found yet, press f to fetch one".to_string()),
        Err(e) => board.log.push(format!("Error reading latest file: {e:#}")),
    }

    let store = SnapshotStore::new(config.history_file.clone(), config.latest_file.clone());
    let settings = PollSettings {
        instrument_key: config.instrument_key.clone(),
        interval: config.poll_interval(),
    };
    let poller = Poller::new(client, store, settings).with_expiry(config.expiry);
    let switch = poller.switch();

    let (board_tx, board_rx) = watch::channel(board);
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    tokio::spawn(poll_task(poller, BoardView { tx: board_tx }, cmd_rx));

    let terminal = ratatui::init();
    let ui_switch = switch.clone();
    let res =
        tokio::task::spawn_blocking(move || ui_loop(terminal, board_rx, ui_switch, cmd_tx)).await;
    ratatui::restore();
    switch.stop();

    match res {
        Ok(Ok(())) => info!("Board closed"),
        Ok(Err(e)) => error!("Terminal error: {e}"),
        Err(e) => error!("UI task failed: {e}"),
    }
}

fn init_logging() -> io::Result<()> {
    let dir = upstox_dir();
    fs::create_dir_all(&dir)?;
    let file = File::options()
        .create(true)
        .append(true)
        .open(dir.join(BOARD_LOG))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true)
        .init();

    Ok(())
}

/// Owns the poller; the only place network calls and file writes happen.
async fn poll_task(
    mut poller: Poller,
    mut view: BoardView,
    mut commands: mpsc::Receiver<Command>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            // terminal errors are already in the activity log
            Command::Run => {
                let _ = poller.run(&mut view).await;
            }
            Command::FetchOnce => {
                if let Err(e) = poller.fetch_once(&mut view).await {
                    error!("One-off fetch failed: {e}");
                    view.log(&format!("Fetch error: {e}"));
                }
            }
        }
    }
}

fn ui_loop(
    mut terminal: DefaultTerminal,
    board: watch::Receiver<Board>,
    switch: LiveSwitch,
    commands: mpsc::Sender<Command>,
) -> io::Result<()> {
    loop {
        let current = board.borrow().clone();
        let live = switch.is_live();
        terminal.draw(|frame| draw(frame, &current, live))?;

        if !event::poll(INPUT_POLL)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match key.code {
            KeyCode::Char('q') => {
                switch.stop();
                return Ok(());
            }
            KeyCode::Char('s') if switch.is_live() => switch.stop(),
            KeyCode::Char('s') => {
                switch.start();
                if !dispatch(&commands, Command::Run) {
                    switch.stop();
                    return Ok(());
                }
            }
            KeyCode::Char('f') if !switch.is_live() => {
                if !dispatch(&commands, Command::FetchOnce) {
                    return Ok(());
                }
            }
            _ => {}
        }
    }
}

/// Hands a command to the poll task; false once that task has gone away.
fn dispatch(commands: &mpsc::Sender<Command>, command: Command) -> bool {
    match commands.blocking_send(command) {
        Ok(()) => true,
        Err(_) => {
            error!("Poll task has exited, closing board");
            false
        }
    }
}

fn draw(frame: &mut Frame, board: &Board, live: bool) {
    let [status_area, table_area, log_area] = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(5),
        Constraint::Length(10),
    ])
    .areas(frame.area());

    let state = if live { "LIVE".green().bold() } else { "STOPPED".red().bold() };
    let expiry = board
        .expiry
        .map(|e| e.to_string())
        .unwrap_or_else(|| "auto".to_string());
    let timestamp = board.timestamp.as_deref().unwrap_or("-");
    let status = ratatui::text::Line::from(vec![
        state,
        format!(
            "  {}  expiry {expiry}  snapshot {timestamp} UTC   [s] start/stop  [f] fetch now  [q] quit",
            board.instrument_key
        )
        .into(),
    ]);
    frame.render_widget(
        Paragraph::new(status).block(Block::bordered().title(" Option chain ")),
        status_area,
    );

    let table_block = Block::bordered().title(format!(" {} strikes ", board.rows.len()));
    if board.rows.is_empty() {
        frame.render_widget(Paragraph::new(NO_DATA).block(table_block), table_area);
    } else {
        let header = Row::new(BOARD_COLUMNS.iter().copied().chain(["STRADDLE"])).bold();
        let rows = board.rows.iter().map(|r| {
            let mut cells = board_cells(r).to_vec();
            cells.push(cell(r.straddle_price));
            Row::new(cells)
        });
        let widths = [Constraint::Length(10); BOARD_COLUMNS.len() + 1];
        frame.render_widget(
            Table::new(rows, widths).header(header).block(table_block),
            table_area,
        );
    }

    let items: Vec<ListItem> = board.log.iter().map(|l| ListItem::new(l.as_str())).collect();
    frame.render_widget(
        List::new(items).block(Block::bordered().title(" App log (recent) ")),
        log_area,
    );
}
