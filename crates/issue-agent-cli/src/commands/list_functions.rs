use anyhow::Result;
use console::style;
use issue_agent::tools::FunctionName;

pub fn execute() -> Result<()> {
    for name in FunctionName::all() {
        let tool = name.tool();
        println!("{}\n  {}", style(&tool.name).bold().cyan(), tool.description);
    }
    Ok(())
}
