pub mod hook;
pub mod init;
pub mod run_script;

use stepcore_runtime::JobContext;
use tracing::info;

/// Ctrl-C cancels the job's running step
pub fn cancel_on_ctrl_c(ctx: &JobContext) {
    let token = ctx.cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Cancellation requested");
            token.cancel();
        }
    });
}
