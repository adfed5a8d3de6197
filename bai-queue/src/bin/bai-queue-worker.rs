//! Standalone worker process.
//!
//! Reads RPC requests from stdin (one JSON object per line) and writes one
//! response per line to stdout. Configured from `QUEUE_*` variables, which
//! may come from a `.env` file. The bundled handlers only log what they
//! receive.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use bai_queue::prelude::*;
use bai_queue::rpc;

struct LogEmail;

#[async_trait]
impl JobHandler for LogEmail {
    type Data = EmailJobData;

    async fn handle(&self, data: EmailJobData, ctx: JobContext) -> Result<(), JobError> {
        info!(job_id = %ctx.job_id, to = %data.to, template = %data.template, "email job");
        Ok(())
    }
}

struct LogImport;

#[async_trait]
impl JobHandler for LogImport {
    type Data = ImportJobData;

    async fn handle(&self, data: ImportJobData, ctx: JobContext) -> Result<(), JobError> {
        info!(
            job_id = %ctx.job_id,
            source = %data.source,
            dataset = ?data.dataset_id,
            "import job"
        );
        Ok(())
    }
}

struct LogVectorization;

#[async_trait]
impl JobHandler for LogVectorization {
    type Data = VectorizationJobData;

    async fn handle(&self, data: VectorizationJobData, ctx: JobContext) -> Result<(), JobError> {
        info!(
            job_id = %ctx.job_id,
            document = %data.document_id,
            model = ?data.model,
            "vectorization job"
        );
        Ok(())
    }
}

struct LogGeneric;

#[async_trait]
impl JobHandler for LogGeneric {
    type Data = GenericJobData;

    async fn handle(&self, data: GenericJobData, ctx: JobContext) -> Result<(), JobError> {
        info!(job_id = %ctx.job_id, name = %data.name, args = %data.args, "generic job");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();
    bai_queue::init_tracing();

    let config = QueueConfig::from_env().context("invalid QUEUE_* configuration")?;
    info!("Starting bai-queue worker with {} workers", config.max_workers);

    let mut module = QueueModule::builder()
        .config(config)
        .handler(LogEmail)
        .handler(LogImport)
        .handler(LogVectorization)
        .handler(LogGeneric)
        .build()
        .await
        .context("failed to build queue module")?;
    module.start()?;

    let service = module.service();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let response = rpc::handle_line(&service, &line).await;
                stdout.write_all(response.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
        }
    }

    module.shutdown().await;
    Ok(())
}
