//! # Analytics Engine Demo
//!
//! Records a burst of sample MCP traffic into an in-memory store and prints the resulting
//! summary, cost totals and a few live dashboard frames.

use analytics_engine::config::{AnalyticsConfig, StorageBackend};
use analytics_engine::live::sse_frame;
use analytics_engine::{init_analytics, log_buffer, logging};
use persistence::{NewCostEntry, NewErrorLog, NewSession, NewUsageEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AnalyticsConfig::default();
    config.storage.backend = StorageBackend::Memory;
    config.live.interval_secs = 1;

    // Initialize logging
    let buffer = log_buffer::install_global(config.log_buffer.capacity);
    logging::initialize_logging(&config.logging, &buffer)?;

    let analytics = init_analytics(config).await?;

    println!("Generating sample analytics events...");

    let session = analytics.create_or_get_session(NewSession::new("demo-session")).await?;

    let tools = ["sequential_thinking", "web_search", "sequential_thinking", "file_read"];
    for (i, tool) in tools.iter().cycle().take(12).enumerate() {
        let mut event = NewUsageEvent::new("tool_call");
        event.session_id = Some(session.session_id.clone());
        event.tool_name = Some(tool.to_string());
        event.response_time_ms = Some(80 + (i as u64 * 17) % 120);
        event.success = i % 5 != 4;
        analytics.record_usage_event(event).await?;

        if i % 5 == 4 {
            let mut error = NewErrorLog::new("ToolTimeout", format!("{tool} timed out"));
            error.session_id = Some(session.session_id.clone());
            analytics.record_error_log(error).await?;
        }
    }

    let mut cost = NewCostEntry::new("langdb", "chat_completion", 0.0425);
    cost.tokens_used = Some(1730);
    analytics.record_cost(cost).await?;

    println!("Summary:\n{}", serde_json::to_string_pretty(&analytics.get_summary(None, None).await?)?);
    println!(
        "Costs:\n{}",
        serde_json::to_string_pretty(&analytics.get_cost_summary(None, None, None).await?)?
    );

    println!("Live dashboard:");
    let mut subscription = analytics.subscribe_dashboard();
    for _ in 0..3 {
        if let Some(metrics) = subscription.next().await {
            print!("{}", sse_frame(&metrics)?);
        }
    }

    println!("Demo completed, {} log lines captured", analytics.get_recent_logs(1000, None).len());
    Ok(())
}
