use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use futures::SinkExt;
use goldmine::ingest::encode_message;
use goldmine::prelude::*;
use tokio::net::TcpStream;
use tokio::time::sleep;
use tokio_util::codec::{FramedWrite, LengthDelimitedCodec};

fn trade(operation: &str, quantity: i64, price: f64, time: &str) -> TradeMessage {
    TradeMessage {
        account: "foo".into(),
        security: "bar".into(),
        price,
        quantity,
        volume: price * quantity as f64,
        volume_currency: "RUB".into(),
        operation: operation.into(),
        execution_time: time.into(),
        strategy: "foobar".into(),
        signal_id: "signal".into(),
        order_comment: String::new(),
    }
}

#[tokio::test]
async fn fills_sent_over_tcp_are_netted_and_reported() -> Result<()> {
    let store = Arc::new(SqliteFillStore::in_memory()?);
    let shutdown = ShutdownSignal::new();
    let metrics = IngestMetrics::new()?;
    let (queue, receiver) = fill_queue(8);
    let writer =
        PersistenceWriter::spawn(store.clone(), receiver, shutdown.clone(), metrics.clone());
    let listener = FillListener::bind(
        "127.0.0.1:0",
        ListenerConfig::default(),
        queue,
        shutdown.clone(),
        metrics.clone(),
    )
    .await?;
    let addr = listener.local_addr()?;
    let listener = tokio::spawn(listener.run());

    let stream = TcpStream::connect(addr).await?;
    let mut sink = FramedWrite::new(stream, LengthDelimitedCodec::new());
    for message in [
        trade("buy", 10, 100.0, "2000-01-01 12:00:00.000"),
        trade("sell", 10, 105.0, "2000-01-01 12:05:00.000"),
        trade("sell", 4, 20.0, "2000-01-01 13:00:00.000"),
        trade("buy", 4, 22.0, "2000-01-01 13:30:00.000"),
        trade("buy", 1, 50.0, "2000-01-01 14:00:00.000"),
    ] {
        sink.send(Bytes::from(encode_message(&message)?)).await?;
    }

    let mut stored = 0;
    for _ in 0..250 {
        stored = store.fills(None)?.len();
        if stored == 5 {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    if stored != 5 {
        return Err(anyhow!("only {stored} fills persisted"));
    }

    let engine = NettingEngine::new(store.clone());
    let outcome = engine.balance()?;
    assert_eq!(outcome.closed.len(), 2);
    assert_eq!(outcome.open_buckets, 1);
    assert_eq!(outcome.closed[0].direction, Direction::Long);
    assert_eq!(outcome.closed[1].direction, Direction::Short);

    let reporter = Reporter::new(
        store.closed_positions(&PositionFilter::default())?,
        &PositionFilter::default(),
    );
    let summary = reporter.summary();
    assert_eq!(summary.total_trades, 2);
    assert_eq!(summary.wins, 1);
    assert_eq!(summary.losses, 1);
    assert!((summary.total_profit - 42.0).abs() < 1e-9);
    let curve = &reporter.profit_curves()["foo"];
    assert!((curve[0].cumulative - 50.0).abs() < 1e-9);
    assert!((curve[1].cumulative - 42.0).abs() < 1e-9);

    shutdown.trigger();
    listener.await??;
    writer.join().await?;
    Ok(())
}
