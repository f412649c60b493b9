use std::{process, sync::Arc};

use bootdoc::{
    bootstrap::{
        BootstrapConfig, CacheRegistry, DocumentRenderer, InterpolationEngine, MemoryBroker,
        RevisionFetcher,
    },
    config::{self, Command, RenderArgs},
    error::AppError,
    infra::{revisions::FsRevisionFetcher, telemetry},
};
use serde_json::{Map, Value};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(Command::Render(RenderArgs::default()));

    telemetry::init(&settings.logging)?;

    match command {
        Command::Render(args) => run_render(settings, args).await,
    }
}

async fn run_render(settings: config::Settings, args: RenderArgs) -> Result<(), AppError> {
    let data = parse_template_data(args.data.as_deref())?;

    let fetcher: Arc<dyn RevisionFetcher> =
        Arc::new(FsRevisionFetcher::new(settings.revisions.directory.clone()));
    let bootstrap = BootstrapConfig::new(settings.project, fetcher)?;
    let project = bootstrap.project.clone();

    // The binary renders once and exits, so an in-process broker stands in for
    // the deployment's pub/sub service.
    let registry = CacheRegistry::new(Arc::new(MemoryBroker::new()));
    let handle = registry.get_or_create(bootstrap).await;

    info!(
        target = "bootdoc::render",
        project = %project,
        subscription = %handle.subscriber().identity(),
        state = ?handle.subscription_state(),
        revisions = %settings.revisions.directory.display(),
        "Rendering bootstrap document"
    );

    let renderer = DocumentRenderer::new(registry, Arc::new(InterpolationEngine));
    let output = renderer
        .render(&project, data, args.revision.as_deref())
        .await?;

    write_document(&mut tokio::io::stdout(), &output.body).await?;
    Ok(())
}

async fn write_document<W>(out: &mut W, body: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    out.write_all(body.as_bytes()).await?;
    out.flush().await
}

fn parse_template_data(raw: Option<&str>) -> Result<Map<String, Value>, AppError> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AppError::validation("--data must be a JSON object")),
        Err(err) => Err(AppError::validation(format!("--data is not valid JSON: {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn document_is_written_verbatim() {
        let mut out = Vec::new();
        write_document(&mut out, "<html>Ada</html>")
            .await
            .expect("write succeeds");
        assert_eq!(out, b"<html>Ada</html>");
    }

    #[test]
    fn template_data_must_be_an_object() {
        assert!(parse_template_data(None).expect("empty data").is_empty());
        let data = parse_template_data(Some(r#"{"name":"Ada"}"#)).expect("object");
        assert_eq!(data.get("name"), Some(&Value::from("Ada")));
        assert!(matches!(
            parse_template_data(Some("[1]")),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            parse_template_data(Some("{")),
            Err(AppError::Validation(_))
        ));
    }
}
