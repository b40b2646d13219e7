//! List command - show builds known to the server

use super::{invocation, Overrides, ServerArgs};
use crate::api::Client;
use anyhow::{Context, Result};
use caib_core::{BuildApi, BuildSummary};
use clap::Args;

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    #[command(flatten)]
    pub server: ServerArgs,
}

pub async fn run(args: ListArgs) -> Result<()> {
    let config = invocation(&args.server, Overrides::default()).await?;
    let api = Client::new(&config.server)?;
    execute(&api).await
}

pub async fn execute<A: BuildApi + ?Sized>(api: &A) -> Result<()> {
    let builds = api.list_builds().await.context("Failed to list builds")?;
    if builds.is_empty() {
        println!("No ImageBuilds found");
        return Ok(());
    }
    print!("{}", render_table(&builds));
    Ok(())
}

fn render_table(builds: &[BuildSummary]) -> String {
    let rows: Vec<[String; 4]> = builds
        .iter()
        .map(|b| {
            [
                b.name.clone(),
                b.phase.to_string(),
                b.message.clone(),
                b.created_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default(),
            ]
        })
        .collect();

    let header = ["NAME", "STATUS", "MESSAGE", "CREATED"];
    let mut widths = header.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cells: [&str; 4]| {
        format!(
            "{:<w0$}  {:<w1$}  {:<w2$}  {}\n",
            cells[0],
            cells[1],
            cells[2],
            cells[3],
            w0 = widths[0],
            w1 = widths[1],
            w2 = widths[2],
        )
    };

    let mut out = line(header);
    for row in &rows {
        out.push_str(&line([&row[0], &row[1], &row[2], &row[3]]));
    }
    out
}
