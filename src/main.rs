use {
    anyhow::{Context, Result},
    clap::Parser,
    journal_engine::{
        Cached, Cli, Command, ComputeEngine, EngineConfig, EventQuery, TradeArgs, TradeQuery,
        data::{CacheStore, EventSource, JsonFileSource, MemoryStore, SnapshotStore, SqliteStore, TradeSource},
        utils::{TimeUtils, now_utc},
    },
    std::{panic, sync::Arc},
    tabled::{Table, Tabled},
};

#[derive(Tabled)]
struct ChartRow {
    date: String,
    label: String,
    pnl: String,
    cumulative: String,
    direction: String,
    trades: usize,
}

#[derive(Tabled)]
struct GroupRow {
    name: String,
    trades: usize,
    wins: usize,
    losses: usize,
    breakeven: usize,
    total_pnl: String,
    average_pnl: String,
    win_rate: String,
}

#[derive(Tabled)]
struct WeekdayRow {
    weekday: String,
    trades: usize,
    wins: usize,
    losses: usize,
    total_pnl: String,
    win_rate: String,
}

#[derive(Tabled)]
struct DailyRow {
    date: String,
    trades: usize,
    wins: usize,
    losses: usize,
    pnl: String,
    best: String,
    worst: String,
}

#[derive(Tabled)]
struct BucketRow {
    bucket: String,
    trades: usize,
    wins: usize,
    win_rate: String,
    total_pnl: String,
}

#[derive(Tabled)]
struct EventRow {
    date: String,
    has_event: bool,
}

fn money(v: f64) -> String {
    format!("{:.2}", v)
}

fn pct(v: f64) -> String {
    format!("{:.1}%", v * 100.0)
}

fn init_log() {
    let (global_level, my_code_level) = if cfg!(debug_assertions) {
        (log::LevelFilter::Warn, log::LevelFilter::Info)
    } else {
        (log::LevelFilter::Error, log::LevelFilter::Warn)
    };

    let mut builder = env_logger::Builder::new();

    builder
        .filter(None, global_level)
        .filter(Some("journal_engine"), my_code_level)
        .parse_default_env()
        .init();
}

async fn open_store(args: &Cli) -> Result<Arc<dyn CacheStore>> {
    if let Some(path) = &args.cache {
        return Ok(Arc::new(SqliteStore::new(&path.to_string_lossy()).await?));
    }
    if let Some(path) = &args.snapshot {
        return Ok(Arc::new(SnapshotStore::open(path)?));
    }
    Ok(Arc::new(MemoryStore::new()))
}

fn load_config(args: &Cli) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load_from_path(path)?,
        None => EngineConfig::default(),
    };
    if args.local {
        config.dispatcher.offload_enabled = false;
        config.dispatcher.local_fallback = true;
    }
    Ok(config)
}

async fn trade_query(trade_args: &TradeArgs) -> Result<TradeQuery> {
    let trades = JsonFileSource::new(&trade_args.trades).fetch_trades().await?;
    let reference = trade_args
        .reference
        .unwrap_or_else(|| now_utc().date_naive());
    Ok(TradeQuery::new(trades, trade_args.period, reference))
}

fn warn_if_stale<T>(cached: &Cached<T>) {
    if cached.stale {
        eprintln!("warning: showing a stale cached result, the recompute failed");
    }
}

async fn run_command(engine: &ComputeEngine, args: &Cli) -> Result<()> {
    let id = args.identity.as_str();
    let now = now_utc();

    let table = match &args.command {
        Command::Chart(a) => {
            let cached = engine.chart(id, trade_query(a).await?, now).await?;
            warn_if_stale(&cached);
            Table::new(cached.value.iter().map(|p| ChartRow {
                date: p.date.format(TimeUtils::STANDARD_TIME_FORMAT).to_string(),
                label: p.label.clone(),
                pnl: money(p.pnl),
                cumulative: money(p.cumulative),
                direction: p.direction.to_string(),
                trades: p.trades.len(),
            }))
        }
        Command::Tags(a) | Command::Sessions(a) => {
            let query = trade_query(a).await?;
            let cached = if matches!(args.command, Command::Tags(_)) {
                engine.tag_stats(id, query, now).await?
            } else {
                engine.session_stats(id, query, now).await?
            };
            warn_if_stale(&cached);
            Table::new(cached.value.iter().map(|g| GroupRow {
                name: g.name.clone(),
                trades: g.trades,
                wins: g.wins,
                losses: g.losses,
                breakeven: g.breakeven,
                total_pnl: money(g.total_pnl),
                average_pnl: money(g.average_pnl),
                win_rate: pct(g.win_rate),
            }))
        }
        Command::Weekdays(a) => {
            let cached = engine.weekday_stats(id, trade_query(a).await?, now).await?;
            warn_if_stale(&cached);
            Table::new(cached.value.iter().map(|w| WeekdayRow {
                weekday: w.weekday.to_string(),
                trades: w.trades,
                wins: w.wins,
                losses: w.losses,
                total_pnl: money(w.total_pnl),
                win_rate: pct(w.win_rate),
            }))
        }
        Command::Daily(a) => {
            let cached = engine.daily_summary(id, trade_query(a).await?, now).await?;
            warn_if_stale(&cached);
            Table::new(cached.value.iter().map(|d| DailyRow {
                date: d.date.format(TimeUtils::STANDARD_TIME_FORMAT).to_string(),
                trades: d.trades,
                wins: d.wins,
                losses: d.losses,
                pnl: money(d.pnl),
                best: money(d.best_trade),
                worst: money(d.worst_trade),
            }))
        }
        Command::RiskReward(a) => {
            let cached = engine.risk_reward(id, trade_query(a).await?, now).await?;
            warn_if_stale(&cached);
            let stats = &cached.value;
            println!(
                "samples: {}  mean: {:.2}  median: {:.2}  std dev: {:.2}",
                stats.sample_size, stats.mean, stats.median, stats.std_dev
            );
            Table::new(stats.buckets.iter().map(|b| BucketRow {
                bucket: b.label.clone(),
                trades: b.trades,
                wins: b.wins,
                win_rate: pct(b.win_rate),
                total_pnl: money(b.total_pnl),
            }))
        }
        Command::Events(a) => {
            let events = JsonFileSource::new(&a.events).fetch_events().await?;
            let query = EventQuery {
                events,
                start: a.start,
                end: a.end,
                min_impact: a.min_impact,
            };
            let cached = engine.event_days(id, query, now).await?;
            warn_if_stale(&cached);
            Table::new(cached.value.iter().map(|(date, has_event)| EventRow {
                date: date.format(TimeUtils::STANDARD_TIME_FORMAT).to_string(),
                has_event: *has_event,
            }))
        }
        Command::Sweep => {
            let report = engine.sweep(now).await?;
            println!(
                "scanned {}, removed {} expired, {} corrupt, kept {}",
                report.scanned, report.removed, report.corrupt, report.retained
            );
            return Ok(());
        }
    };

    println!("{}", table);

    let stats = engine.dispatcher().stats();
    log::info!(
        "dispatcher: {} submitted, {} remote, {} local, {} failed",
        stats.submitted,
        stats.completed_remote,
        stats.completed_local,
        stats.failed
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::force_capture();
        log::error!("CRITICAL PANIC:\n{}\nStack Trace:\n{}", info, backtrace);
    }));

    init_log();

    let args = Cli::parse();
    let config = load_config(&args).context("Failed to load engine configuration")?;
    let store = open_store(&args).await.context("Failed to open cache store")?;

    let engine = ComputeEngine::new(config, store);
    engine.start(false).await;

    let result = run_command(&engine, &args).await;

    engine.shutdown().await;
    result
}
