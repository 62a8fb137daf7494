use crate::context::CliContext;
use crate::output;

pub fn handle(ctx: &CliContext) -> anyhow::Result<()> {
    output::output_success(serde_json::json!({
        "path": ctx.config_path,
        "config": ctx.config,
    }))
}
