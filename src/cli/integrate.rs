//! Integrate command - integrate a source branch into its target

use crate::cli::context::{CommandContext, RequestOptions};
use crate::cli::preview::{report_preview, settled_preview};
use crate::cli::style::{Stylize, check};
use anstream::println;
use pr_engine::error::{Error, Result};
use pr_engine::integration::branch_head;
use std::path::Path;

/// Options for the integrate command
#[derive(Debug, Clone, Default)]
pub struct IntegrateOptions {
    /// Comment recorded with the integration
    pub comment: Option<String>,
    /// Dry run - show the preview without moving any branch
    pub dry_run: bool,
}

/// Run the integrate command
pub async fn run_integrate(
    config_path: Option<&Path>,
    request: RequestOptions,
    options: IntegrateOptions,
) -> Result<()> {
    let ctx = CommandContext::new(config_path, &request).await?;

    println!(
        "{}",
        format!("Integrating {} into {}...", ctx.source, ctx.target).muted()
    );
    let pr = ctx.open_and_settle(&request).await?;
    let preview = settled_preview(&ctx, &pr).await?;
    report_preview(&pr, &preview);

    if options.dry_run {
        println!("{}", "Dry run, nothing integrated".muted());
        return ctx.manager.delete(pr.id).await;
    }

    if !ctx.manager.can_integrate(pr.id).await? {
        let status = ctx.manager.status(&pr);
        ctx.manager.delete(pr.id).await?;
        return Err(Error::illegal_state(format!(
            "Pull request #{} cannot be integrated ({status}).",
            pr.id
        )));
    }

    let result = ctx
        .manager
        .integrate(pr.id, ctx.user.as_deref(), options.comment.as_deref())
        .await;
    ctx.manager.settle().await;

    let integrated = match result {
        Ok(()) => ctx.manager.load(pr.id).await?,
        Err(e) => {
            ctx.manager.delete(pr.id).await?;
            return Err(e);
        }
    };

    let head = branch_head(ctx.vcs.as_ref(), &ctx.target).await?;
    println!(
        "{} Integrated into {} at {}",
        check(),
        ctx.target.branch.emphasis(),
        head.short().accent()
    );
    if integrated.strategy.rewrites_source() {
        println!(
            "  {} {}",
            "source".muted(),
            format!("{} moved to the integrated commit", ctx.source.branch).muted()
        );
    }

    ctx.manager.delete(pr.id).await
}
