use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use tabled::{Table, Tabled};

use runform::baseline::{Evaluator, Trainer};
use runform::cancel::CancellationToken;
use runform::config::Config;
use runform::database::Database;
use runform::ingest::provider::OfflineProvider;
use runform::ingest::{BatchDayResult, IngestWorker};
use runform::logging::{init_logging, LogLevel};

/// runform - Running-form baseline and evaluation engine
///
/// Learns pace-conditioned expectations of an athlete's form (ground
/// contact time, vertical oscillation, vertical ratio, power) and scores
/// each activity against them.
///
/// The bundled commands operate cache-first against the local data
/// directory; a remote transport is injected through the library API.
#[derive(Parser)]
#[command(name = "runform")]
#[command(version = "0.1.0")]
#[command(about = "Running-form baseline and evaluation engine", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Custom data directory path
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest one activity through the cache tiers
    Ingest {
        /// Activity date (YYYY-MM-DD); the id is resolved from the store
        #[arg(short, long, group = "target")]
        date: Option<NaiveDate>,

        /// Explicit activity id; pass --id-date as well when the store
        /// does not know the activity yet
        #[arg(short, long, group = "target")]
        id: Option<i64>,

        /// Activity date used together with --id
        #[arg(long, value_name = "DATE")]
        id_date: Option<NaiveDate>,
    },

    /// Ingest one activity per day over a date range
    BatchIngest {
        /// First date, inclusive (YYYY-MM-DD)
        #[arg(long)]
        start_date: NaiveDate,

        /// Last date, inclusive (YYYY-MM-DD)
        #[arg(long)]
        end_date: NaiveDate,

        /// Write the per-day result list to this JSON file
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Train form and power baselines over the rolling window
    Train {
        /// Window end date (YYYY-MM-DD); defaults to today
        #[arg(short, long)]
        end_date: Option<NaiveDate>,

        /// Rolling window in calendar months
        #[arg(short, long)]
        window_months: Option<u32>,
    },

    /// Evaluate an activity against its covering baseline
    Evaluate {
        /// Activity date (YYYY-MM-DD); the id is resolved from the store
        #[arg(short, long, group = "target")]
        date: Option<NaiveDate>,

        /// Explicit activity id (its date must already be in the store)
        #[arg(short, long, group = "target")]
        id: Option<i64>,
    },

    /// Show the trained baseline history
    Baselines,

    /// Show the seven-day median body mass for a date
    Weight {
        /// Target date (YYYY-MM-DD)
        #[arg(short, long)]
        date: NaiveDate,
    },
}

#[derive(Tabled)]
struct BaselineDisplay {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Period")]
    period: String,
    #[tabled(rename = "Samples")]
    n_samples: i64,
    #[tabled(rename = "RMSE")]
    rmse: String,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("{} {e:#}", "error:".red().bold());
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if cli.verbose > 0 {
        config.log.level = if cli.verbose > 1 {
            LogLevel::Trace
        } else {
            LogLevel::Debug
        };
    } else if cli.quiet {
        config.log.level = LogLevel::Error;
    }
    init_logging(&config.log)?;

    let mut db = Database::open(config.database_path())
        .with_context(|| format!("opening database at {}", config.database_path().display()))?;
    let cancel = CancellationToken::new();

    match cli.command {
        Commands::Ingest { date, id, id_date } => {
            let worker = IngestWorker::new(OfflineProvider, &config);
            let outcome = match (id, date) {
                (Some(id), _) => {
                    let date = match id_date {
                        Some(date) => date,
                        None => db
                            .get_activity_date(id)?
                            .ok_or_else(|| anyhow!("activity {id} not in store; pass --id-date"))?,
                    };
                    worker.process_activity(&mut db, id, date, &cancel)?
                }
                (None, Some(date)) => worker.process_by_date(&mut db, date, &cancel)?,
                (None, None) => {
                    return Err(anyhow!("pass either --date or --id"));
                }
            };

            println!(
                "{} activity {} ({}) via {:?}: {} splits, body mass {}",
                "ingested".green().bold(),
                outcome.activity_id,
                outcome.date,
                outcome.source,
                outcome.split_count,
                outcome
                    .body_mass_kg
                    .map(|kg| format!("{kg:.1} kg"))
                    .unwrap_or_else(|| "n/a".to_string()),
            );
        }

        Commands::BatchIngest {
            start_date,
            end_date,
            output,
        } => {
            if end_date < start_date {
                return Err(anyhow!("end date precedes start date"));
            }
            let worker = IngestWorker::new(OfflineProvider, &config);
            let results = worker.batch_ingest(&mut db, start_date, end_date, &cancel)?;

            let succeeded = results
                .iter()
                .filter(|r| matches!(r, BatchDayResult::Success { .. }))
                .count();
            println!(
                "{} {}/{} days ingested",
                "batch complete:".green().bold(),
                succeeded,
                results.len()
            );

            if let Some(path) = output {
                std::fs::write(&path, serde_json::to_string_pretty(&results)?)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("results written to {}", path.display());
            }
        }

        Commands::Train {
            end_date,
            window_months,
        } => {
            let end_date =
                end_date.unwrap_or_else(|| chrono::Local::now().date_naive());
            let window = window_months.unwrap_or(config.training.window_months);

            let trainer = Trainer::from_config(&config);
            let report = trainer.train(&mut db, end_date, window, &cancel)?;

            println!(
                "{} {} to {}",
                "trained".green().bold(),
                report.period_start,
                report.period_end
            );
            for (name, metric) in [
                ("gct", &report.gct),
                ("vo", &report.vo),
                ("vr", &report.vr),
                ("power", &report.power),
            ] {
                match metric {
                    Some(m) => println!("  {name:5} n={} rmse={:.3}", m.n_samples, m.rmse),
                    None => println!("  {name:5} {}", "skipped".yellow()),
                }
            }
        }

        Commands::Evaluate { date, id } => {
            let (activity_id, activity_date) = match (id, date) {
                (Some(id), _) => {
                    let date = db
                        .get_activity_date(id)?
                        .ok_or_else(|| anyhow!("activity {id} not in store; ingest it first"))?;
                    (id, date)
                }
                (None, Some(date)) => {
                    let ids = db.activities_on(date)?;
                    match ids.as_slice() {
                        [only] => (*only, date),
                        [] => return Err(anyhow!("no activity in store for {date}")),
                        many => {
                            return Err(anyhow!(
                                "multiple activities for {date}: {many:?}; pass --id"
                            ))
                        }
                    }
                }
                (None, None) => return Err(anyhow!("pass either --date or --id")),
            };

            let evaluator = Evaluator::from_config(&config);
            let record = evaluator.evaluate(&mut db, activity_id, activity_date, &cancel)?;

            println!(
                "{} activity {activity_id} ({activity_date})",
                "evaluated".green().bold()
            );
            println!("  GCT  {} {}", record.gct.star_rating, record.gct.evaluation_text);
            println!("  VO   {} {}", record.vo.star_rating, record.vo.evaluation_text);
            println!("  VR   {} {}", record.vr.star_rating, record.vr.evaluation_text);
            println!(
                "  cadence {:.0} spm (target {:.0}): {}",
                record.cadence.actual,
                record.cadence.minimum,
                if record.cadence.achieved {
                    "achieved".green()
                } else {
                    "below target".yellow()
                }
            );
            println!(
                "  overall {:.2}/5 {}",
                record.overall_score, record.overall_star_rating
            );
            if let (Some(power), Some(score)) = (&record.power, record.integrated_score) {
                println!(
                    "  power {:.0} W ({:.2} W/kg) {} efficiency {:+.3}",
                    power.avg_w, power.wkg, power.star_rating, power.efficiency_score
                );
                println!(
                    "  integrated {score:.1}/100 (mode {})",
                    record
                        .training_mode
                        .map(|m| m.as_str())
                        .unwrap_or("unknown")
                );
            }
        }

        Commands::Baselines => {
            let rows = db.list_baselines(&config.user_id, &config.condition_group)?;
            if rows.is_empty() {
                println!("no baselines trained yet");
                return Ok(());
            }

            let display: Vec<BaselineDisplay> = rows
                .iter()
                .map(|row| BaselineDisplay {
                    metric: row.metric.to_string(),
                    model: row.model_kind.as_str().to_string(),
                    period: format!("{} .. {}", row.period_start, row.period_end),
                    n_samples: row.n_samples,
                    rmse: row
                        .rmse
                        .or(row.power_rmse)
                        .map(|r| format!("{r:.4}"))
                        .unwrap_or_default(),
                })
                .collect();
            println!("{}", Table::new(display));
        }

        Commands::Weight { date } => {
            let cache = runform::ingest::raw_cache::RawFileCache::new(&config);
            let provider = OfflineProvider;
            let aggregator =
                runform::ingest::weight::BodyMassAggregator::new(&cache, &provider);
            match aggregator.median_weight(date)? {
                Some(median) => println!(
                    "{} {:.2} kg over {} samples (7 days ending {date})",
                    "median".green().bold(),
                    median.weight_kg,
                    median.sample_count
                ),
                None => println!("no weigh-in samples in the 7 days ending {date}"),
            }
        }
    }

    Ok(())
}
