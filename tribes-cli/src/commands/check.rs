//! Check command - run one verified transaction and report its settings

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tribes_db::{Session, StoreConfig, TxContext, TxError};

#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Schema to route the transaction through (overrides config)
    #[arg(long)]
    pub schema: Option<String>,

    /// Overall deadline in seconds, retries included
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Session settings as the server saw them inside the transaction
#[derive(Debug, Serialize)]
pub struct SessionReport {
    pub isolation: String,
    pub lock_timeout: String,
    pub statement_timeout: String,
    pub search_path: String,
}

pub async fn run_check(config: &StoreConfig, args: CheckArgs) -> Result<()> {
    let manager = super::connect(config)?;

    let ctx = TxContext::background().with_timeout(Duration::from_secs(args.timeout));
    let ctx = match args.schema {
        Some(schema) => ctx.with_schema(schema),
        None => ctx,
    };
    let namespace = manager.namespace(&ctx).map(str::to_owned);

    let report = manager
        .run(&ctx, |tx| {
            Box::pin(async move {
                Ok::<_, TxError>(SessionReport {
                    isolation: tx.current_setting("transaction_isolation").await?,
                    lock_timeout: tx.current_setting("lock_timeout").await?,
                    statement_timeout: tx.current_setting("statement_timeout").await?,
                    search_path: tx.current_setting("search_path").await?,
                })
            })
        })
        .await
        .context("Check transaction failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("isolation          {}", report.isolation);
        println!("lock_timeout       {}", report.lock_timeout);
        println!("statement_timeout  {}", report.statement_timeout);
        println!("search_path        {}", report.search_path);
        println!(
            "namespace          {}",
            namespace.as_deref().unwrap_or("(none)")
        );
    }

    Ok(())
}
