//! Loading state management commands.

use std::io::Write;

use console::style;

use dsexport::config::Settings;
use dsexport::export::open_state_store;

/// Print the persisted loading state.
pub async fn cmd_state_show(settings: &Settings) -> anyhow::Result<()> {
    let store = open_state_store(settings)?;
    let Some(state) = store.load().await? else {
        println!("{} No loading state saved", style("!").yellow());
        return Ok(());
    };

    println!("{}", serde_json::to_string_pretty(&state)?);
    println!(
        "\n{} of {} windows done",
        style(state.done_count()).bold(),
        state.window_count()
    );
    Ok(())
}

/// Clear the persisted loading state.
pub async fn cmd_state_reset(settings: &Settings, yes: bool) -> anyhow::Result<()> {
    if !yes {
        print!(
            "Reset loading state `{}`? The next export re-processes every window. [y/N] ",
            settings.state_key
        );
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            println!("Aborted");
            return Ok(());
        }
    }

    open_state_store(settings)?.clear().await?;
    println!("{} Loading state reset", style("✓").green());
    Ok(())
}
