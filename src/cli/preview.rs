//! Preview command - show how a source branch would integrate

use crate::cli::context::{CommandContext, RequestOptions};
use crate::cli::style::{Stylize, arrow, check, cross};
use anstream::println;
use pr_engine::error::{Error, Result};
use pr_engine::types::{IntegrationPreview, PullRequest};
use std::path::Path;

/// Options for the preview command
#[derive(Debug, Clone, Default)]
pub struct PreviewOptions {
    /// Keep `refs/pull/*` refs (including the integration ref) afterwards
    pub keep_refs: bool,
}

/// Run the preview command
pub async fn run_preview(
    config_path: Option<&Path>,
    request: RequestOptions,
    options: PreviewOptions,
) -> Result<()> {
    let ctx = CommandContext::new(config_path, &request).await?;

    println!(
        "{}",
        format!("Previewing {} into {}...", ctx.source, ctx.target).muted()
    );
    let pr = ctx.open_and_settle(&request).await?;
    let preview = settled_preview(&ctx, &pr).await?;

    report_preview(&pr, &preview);

    if options.keep_refs {
        println!(
            "  {} {}",
            arrow(),
            format!("refs kept under refs/pull/{}/", pr.id).muted()
        );
    } else {
        ctx.manager.delete(pr.id).await?;
    }
    Ok(())
}

/// Preview of a settled request; the computation failed if there is none
pub(crate) async fn settled_preview(
    ctx: &CommandContext,
    pr: &PullRequest,
) -> Result<IntegrationPreview> {
    match ctx.manager.preview_integration(pr.id).await? {
        Some(preview) => Ok(preview),
        None => {
            ctx.manager.delete(pr.id).await?;
            Err(Error::Internal(
                "integration preview could not be calculated (run with -v for details)".to_string(),
            ))
        }
    }
}

/// Print a preview summary
pub(crate) fn report_preview(pr: &PullRequest, preview: &IntegrationPreview) {
    println!(
        "Pull request {}: {} {} {} ({})",
        format!("#{}", pr.id).accent(),
        pr.source.branch.emphasis(),
        arrow(),
        pr.target.branch.emphasis(),
        preview.strategy
    );
    println!(
        "  {} {}",
        "target".muted(),
        preview.target_head.short().accent()
    );
    println!(
        "  {} {}",
        "source".muted(),
        preview.request_head.short().accent()
    );

    match &preview.integrated {
        Some(commit) if *commit == preview.target_head => {
            println!("{} Already integrated", check());
        }
        Some(commit) => {
            println!(
                "{} {} {}",
                check(),
                "Integrates cleanly as".success(),
                commit.short().accent()
            );
        }
        None => {
            println!("{} {}", cross(), "Integration has conflicts".warn());
        }
    }
}
