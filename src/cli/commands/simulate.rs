//! Simulate command - run a protection scenario against an in-memory store

use crate::cache::{create_accessor, CacheAccessor, LogicalRead};
use crate::cli::args::{Scenario, SimulateArgs};
use crate::config::schema::Backend;
use crate::config::Config;
use crate::error::{CacheError, CacheResult};
use crate::lock::LockTiming;
use crate::ui;
use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::debug;

const STAMPEDE_KEY: &str = "spot:1001";
const REFRESH_KEY: &str = "post:500";
const PENETRATION_KEY: &str = "post:404";

const VALUE_TTL: Duration = Duration::from_secs(30 * 60);
const LOGICAL_TTL: Duration = Duration::from_secs(20);

/// Execute the simulate command
pub async fn execute(args: SimulateArgs, config: &Config) -> CacheResult<()> {
    let mut config = config.clone();
    config.store.backend = Backend::Memory;

    let accessor = Arc::new(create_accessor(&config).await?);
    let timing = LockTiming::new(config.lock.wait(), config.lock.lease());

    let report = run(Arc::clone(&accessor), timing, &args).await?;
    accessor.scheduler().shutdown().await;

    report.print();
    Ok(())
}

/// What a scenario observed
#[derive(Debug)]
pub struct SimulationReport {
    pub scenario: Scenario,
    pub callers: usize,
    pub loader_calls: usize,
    pub elapsed: Duration,
    pub details: Vec<(&'static str, String)>,
}

impl SimulationReport {
    /// The source saw at most one load for the whole run
    pub fn protected(&self) -> bool {
        self.loader_calls <= 1
    }

    fn print(&self) {
        ui::section(&format!("Scenario: {}", scenario_name(self.scenario)));
        ui::key_value("callers", &self.callers.to_string());
        ui::key_value("loader calls", &self.loader_calls.to_string());
        ui::key_value("elapsed", &format!("{}ms", self.elapsed.as_millis()));
        for (key, value) in &self.details {
            ui::key_value(key, value);
        }
        println!();

        if self.protected() {
            ui::step_ok(&format!(
                "Source loaded {} time(s) for {} callers",
                self.loader_calls, self.callers
            ));
        } else {
            ui::step_error_detail("Source loaded more than once", &self.loader_calls.to_string());
        }
    }
}

fn scenario_name(scenario: Scenario) -> &'static str {
    match scenario {
        Scenario::Stampede => "stampede (mutex)",
        Scenario::Refresh => "refresh (logical expiration)",
        Scenario::Penetration => "penetration (pass-through)",
    }
}

/// Run one scenario on `accessor`
pub async fn run(
    accessor: Arc<CacheAccessor>,
    timing: LockTiming,
    args: &SimulateArgs,
) -> CacheResult<SimulationReport> {
    let callers = args.callers.max(1);
    let latency = Duration::from_millis(args.loader_ms);

    match args.scenario {
        Scenario::Stampede => stampede(accessor, timing, callers, latency).await,
        Scenario::Refresh => refresh(accessor, timing, callers, latency).await,
        Scenario::Penetration => penetration(&accessor, callers, latency).await,
    }
}

/// Simulated backing source that counts its loads
struct Source {
    calls: Arc<AtomicUsize>,
    latency: Duration,
    value: Option<String>,
}

type Load = BoxFuture<'static, CacheResult<Option<String>>>;
type Loader = Box<dyn FnOnce(String) -> Load + Send>;

impl Source {
    fn new(value: Option<&str>, latency: Duration) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            latency,
            value: value.map(str::to_string),
        }
    }

    fn loader(&self) -> Loader {
        let calls = Arc::clone(&self.calls);
        let latency = self.latency;
        let value = self.value.clone();
        Box::new(move |key: String| -> Load {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                debug!("Source loading {}", key);
                tokio::time::sleep(latency).await;
                Ok(value)
            })
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn join_error(e: tokio::task::JoinError) -> CacheError {
    CacheError::Internal(format!("simulated caller failed: {}", e))
}

async fn stampede(
    accessor: Arc<CacheAccessor>,
    timing: LockTiming,
    callers: usize,
    latency: Duration,
) -> CacheResult<SimulationReport> {
    let source = Source::new(Some("shop #1001"), latency);
    let started = Instant::now();

    let mut tasks = JoinSet::new();
    for _ in 0..callers {
        let accessor = Arc::clone(&accessor);
        let loader = source.loader();
        tasks.spawn(async move {
            accessor
                .query_mutex::<String, CacheError, _, _>(STAMPEDE_KEY, timing, VALUE_TTL, loader)
                .await
        });
    }

    let mut served = 0;
    while let Some(joined) = tasks.join_next().await {
        if joined.map_err(join_error)??.is_some() {
            served += 1;
        }
    }

    Ok(SimulationReport {
        scenario: Scenario::Stampede,
        callers,
        loader_calls: source.calls(),
        elapsed: started.elapsed(),
        details: vec![
            ("key", STAMPEDE_KEY.to_string()),
            ("served value", format!("{}/{}", served, callers)),
            ("loader latency", format!("{}ms", latency.as_millis())),
        ],
    })
}

async fn refresh(
    accessor: Arc<CacheAccessor>,
    timing: LockTiming,
    callers: usize,
    latency: Duration,
) -> CacheResult<SimulationReport> {
    // Prime an entry that is already past its logical expiry
    accessor
        .set_with_logical_expire(REFRESH_KEY, &"stale post".to_string(), Duration::ZERO)
        .await?;

    let source = Source::new(Some("fresh post"), latency);
    let started = Instant::now();

    let mut tasks = JoinSet::new();
    for _ in 0..callers {
        let accessor = Arc::clone(&accessor);
        let loader = source.loader();
        tasks.spawn(async move {
            accessor
                .query_logical_expire::<String, CacheError, _, _>(
                    REFRESH_KEY,
                    timing,
                    LOGICAL_TTL,
                    loader,
                )
                .await
        });
    }

    let mut stale = 0;
    while let Some(joined) = tasks.join_next().await {
        if joined.map_err(join_error)??.is_stale() {
            stale += 1;
        }
    }
    let read_latency = started.elapsed();

    accessor.scheduler().wait_idle().await;
    let after = accessor
        .query_logical_expire::<String, CacheError, _, _>(
            REFRESH_KEY,
            timing,
            LOGICAL_TTL,
            source.loader(),
        )
        .await?;
    let after = match after {
        LogicalRead::Fresh(value) => format!("fresh {:?}", value),
        LogicalRead::Stale(value) => format!("still stale {:?}", value),
        LogicalRead::Missing => "missing".to_string(),
    };

    Ok(SimulationReport {
        scenario: Scenario::Refresh,
        callers,
        loader_calls: source.calls(),
        elapsed: started.elapsed(),
        details: vec![
            ("key", REFRESH_KEY.to_string()),
            ("served stale", format!("{}/{}", stale, callers)),
            ("read latency", format!("{}ms", read_latency.as_millis())),
            ("after rebuild", after),
        ],
    })
}

async fn penetration(
    accessor: &CacheAccessor,
    callers: usize,
    latency: Duration,
) -> CacheResult<SimulationReport> {
    let source = Source::new(None, latency);
    let started = Instant::now();

    let mut absent = 0;
    for _ in 0..callers {
        let found = accessor
            .query_pass_through::<String, CacheError, _, _>(
                PENETRATION_KEY,
                VALUE_TTL,
                source.loader(),
            )
            .await?;
        if found.is_none() {
            absent += 1;
        }
    }

    Ok(SimulationReport {
        scenario: Scenario::Penetration,
        callers,
        loader_calls: source.calls(),
        elapsed: started.elapsed(),
        details: vec![
            ("key", PENETRATION_KEY.to_string()),
            ("answered absent", format!("{}/{}", absent, callers)),
            (
                "absence ttl",
                format!("{}s", accessor.settings().absent_ttl.as_secs()),
            ),
        ],
    })
}
