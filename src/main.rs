mod broker;
mod codec;
mod config;
mod consumer;
mod context;
mod db;
mod generator;
mod models;
mod producer;
mod sink;
mod source;
mod types;

use std::io::{stderr, stdout, BufWriter, Write};
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer};

use crate::broker::{MemoryBroker, MessageSubscriber};
use crate::config::PipelineConfig;
use crate::consumer::{ConsumerSettings, ConsumerStats, MessageOutcome, TransactionConsumer};
use crate::context::PipelineContext;
use crate::generator::generate_batch;
#[cfg(feature = "kafka")]
use crate::producer::BatchReport;
use crate::producer::{ProducerSettings, TransactionProducer};
use crate::sink::{MemorySink, Sink};
use crate::source::{CsvRecordSource, MemoryRecordSource, RecordSource};

const USAGE: &str = "Usage: transaction-pipeline <command> [argument]

Commands:
  seed [count]        insert synthetic transactions into the source table
  import <file.csv>   copy a CSV file into the source table
  produce [limit]     publish one batch from the source table to Kafka
  consume             apply Kafka messages to the sink table until Ctrl-C
  demo [count]        run the whole pipeline twice in memory

Configuration is read from the environment and an optional .env file.";

const DEMO_PARTITIONS: usize = 3;
const DEMO_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, PartialEq)]
enum Command {
    Seed(Option<usize>),
    Import(PathBuf),
    Produce(Option<usize>),
    Consume,
    Demo(Option<usize>)
}

#[tokio::main]
async fn main() -> Result<()> {
    //NOTE: Still only five commands; clap would earn its place once flags show up.
    let args: Vec<String> = std::env::args().skip(1).collect();

    let command = match parse_command(&args) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("{message}\n\n{USAGE}");
            exit(1);
        }
    };

    let config = PipelineConfig::from_env()?;
    setup_logging(config.log_level);

    let context = PipelineContext::new(config);
    let batch_limit = context.config().batch_limit;

    let timer = Instant::now();

    let result = match command {
        Command::Seed(count) => seed(&context, count.unwrap_or(batch_limit)).await,
        Command::Import(path) => import(&context, path).await,
        Command::Produce(limit) => produce(&context, limit.unwrap_or(batch_limit)).await,
        Command::Consume => consume(&context).await,
        Command::Demo(count) => demo(&context, count.unwrap_or(batch_limit)).await
    };

    context.close().await;

    let duration = timer.elapsed();
    info!("Command finished in: {duration:?}");

    result
}

fn parse_command(args: &[String]) -> Result<Command, String> {
    let Some(name) = args.first() else {
        return Err("Missing command".to_string());
    };

    let argument = args.get(1).map(String::as_str);

    let count = |argument: Option<&str>| -> Result<Option<usize>, String> {
        argument
            .map(|value| value.parse::<usize>().map_err(|_| format!("Expected a count, got '{value}'")))
            .transpose()
    };

    match name.as_str() {
        "seed" => Ok(Command::Seed(count(argument)?)),
        "import" => argument
            .map(|path| Command::Import(PathBuf::from(path)))
            .ok_or_else(|| "import needs a CSV file path".to_string()),
        "produce" => Ok(Command::Produce(count(argument)?)),
        "consume" => Ok(Command::Consume),
        "demo" => Ok(Command::Demo(count(argument)?)),
        other => Err(format!("Unknown command '{other}'"))
    }
}

fn setup_logging(level: LevelFilter) {
    //NOTE: Stdout carries the command summary, so logging goes to stderr
    let terminal_log = fmt::layer()
        .with_target(false)
        .with_writer(stderr)
        .with_filter(level);

    tracing_subscriber::registry()
        .with(terminal_log)
        .init();
}

async fn seed(context: &PipelineContext, count: usize) -> Result<()> {
    let source = context.source().await?;
    source.ensure_schema().await?;

    let mut inserted = 0;

    for transaction in generate_batch(count) {
        if source.insert(&transaction).await? {
            inserted += 1;
        }
    }

    info!(generated = count, inserted, "Seeded source table");

    write_summary(&[("generated", count), ("inserted", inserted)])
}

async fn import(context: &PipelineContext, path: PathBuf) -> Result<()> {
    let transactions = CsvRecordSource::new(path).fetch(usize::MAX).await?;

    let source = context.source().await?;
    source.ensure_schema().await?;

    let mut inserted = 0;

    for transaction in &transactions {
        if source.insert(transaction).await? {
            inserted += 1;
        }
    }

    info!(read = transactions.len(), inserted, "Imported CSV into source table");

    write_summary(&[("read", transactions.len()), ("inserted", inserted)])
}

async fn produce(context: &PipelineContext, limit: usize) -> Result<()> {
    let source = Arc::new(context.source().await?);

    #[cfg(feature = "kafka")]
    {
        let publisher = Arc::new(context.publisher().await?);
        let producer = TransactionProducer::new(source, publisher, context.config().producer.clone());

        let report = producer.publish_batch(limit).await?;

        write_report(&report)
    }

    #[cfg(not(feature = "kafka"))]
    {
        drop(source);
        info!(limit, "Source reachable, broker is not");

        Err(context.kafka_disabled().into())
    }
}

async fn consume(context: &PipelineContext) -> Result<()> {
    let sink = Arc::new(context.sink().await?);
    sink.ensure_schema().await?;

    let rows = sink.row_count().await?;
    info!(rows, "Sink table ready");

    #[cfg(feature = "kafka")]
    {
        let consumer = TransactionConsumer::new(context.subscriber().await?, sink.clone(), context.config().consumer.clone());

        let stats = consumer.run(shutdown_on_ctrl_c()).await?;
        let rows = sink.row_count().await?;

        write_stats(&stats, rows as usize)
    }

    #[cfg(not(feature = "kafka"))]
    {
        Err(context.kafka_disabled().into())
    }
}

#[cfg(feature = "kafka")]
fn shutdown_on_ctrl_c() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(error) => tracing::warn!("Cannot listen for Ctrl-C, stopping: {error}")
        }

        trigger.cancel();
    });

    shutdown
}

/// Runs source to sink twice over in-memory infrastructure.
///
/// The second run republishes every record and restarts the consumer group,
/// so the sink row count shows redelivery leaving the table unchanged.
async fn demo(context: &PipelineContext, count: usize) -> Result<()> {
    let source = Arc::new(MemoryRecordSource::new(generate_batch(count)));
    let kafka = &context.config().kafka;
    let broker = MemoryBroker::new(&kafka.topic, DEMO_PARTITIONS);
    let sink = Arc::new(MemorySink::new());
    sink.ensure_schema().await?;

    let producer_settings = ProducerSettings {
        pacing: Duration::ZERO,
        ..context.config().producer.clone()
    };
    let consumer_settings = ConsumerSettings {
        poll_interval: DEMO_POLL_INTERVAL,
        ..context.config().consumer.clone()
    };

    let producer = TransactionProducer::new(source, Arc::new(broker.publisher()?), producer_settings);
    let mut stats = ConsumerStats::default();

    for run in 1..=2 {
        let report = producer.publish_batch(count).await?;
        let consumer = TransactionConsumer::new(broker.subscriber(&kafka.group_id)?, sink.clone(), consumer_settings.clone());

        let run_stats = consume_until_idle(&consumer).await?;

        info!(
            run,
            topic = broker.topic(),
            delivered = report.delivered,
            applied = run_stats.applied,
            already_present = run_stats.already_present,
            "Demo run complete"
        );

        stats.merge(&run_stats);
    }

    write_stats(&stats, sink.len())
}

async fn consume_until_idle<B, K>(consumer: &TransactionConsumer<B, K>) -> Result<ConsumerStats>
where
    B: MessageSubscriber,
    K: Sink,
{
    let shutdown = CancellationToken::new();
    let mut stats = ConsumerStats::default();

    loop {
        match consumer.process_next(&shutdown).await? {
            MessageOutcome::Idle => return Ok(stats),
            outcome => stats.record(outcome)
        }
    }
}

fn write_summary(fields: &[(&str, usize)]) -> Result<()> {
    let mut output = BufWriter::new(stdout().lock());

    for (name, value) in fields {
        writeln!(output, "{name}={value}")?;
    }

    output.flush()?;

    Ok(())
}

#[cfg(feature = "kafka")]
fn write_report(report: &BatchReport) -> Result<()> {
    let mut output = BufWriter::new(stdout().lock());

    writeln!(output, "fetched={}", report.fetched)?;
    writeln!(output, "submitted={}", report.submitted)?;
    writeln!(output, "delivered={}", report.delivered)?;

    for transaction_id in &report.failed_ids {
        writeln!(output, "failed={transaction_id}")?;
    }

    for transaction_id in &report.unacknowledged_ids {
        writeln!(output, "unacknowledged={transaction_id}")?;
    }

    output.flush()?;

    Ok(())
}

fn write_stats(stats: &ConsumerStats, sink_rows: usize) -> Result<()> {
    write_summary(&[
        ("polled", stats.polled),
        ("applied", stats.applied),
        ("already_present", stats.already_present),
        ("skipped_malformed", stats.skipped_malformed),
        ("skipped_fatal", stats.skipped_fatal),
        ("broker_errors", stats.broker_errors),
        ("retried", stats.retried),
        ("sink_rows", sink_rows),
    ])
}
