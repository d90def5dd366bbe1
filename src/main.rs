//! ant 命令行入口
//!
//! 用法：ant [--config <路径>] [--criteria <JSON>] [--report] <目标文本>
//! 目标执行到终态后打印状态、摘要与载荷；--criteria 传入判据对象
//! （如 '{"found": "IsTrue", "count": {"AtLeast": 1}}'）；--report 额外
//! 打印工具可靠性报告。

use std::collections::BTreeMap;
use std::path::PathBuf;

use ant::{load_config, Agent, CriterionPredicate, Goal, GoalStatus};

fn usage() -> ! {
    eprintln!("用法: ant [--config <路径>] [--criteria <JSON>] [--report] <目标文本>");
    std::process::exit(2);
}

struct CliArgs {
    goal_text: String,
    criteria: BTreeMap<String, CriterionPredicate>,
    config_path: Option<PathBuf>,
    show_report: bool,
}

fn parse_args(args: Vec<String>) -> anyhow::Result<CliArgs> {
    let mut criteria = BTreeMap::new();
    let mut config_path = None;
    let mut show_report = false;
    let mut goal_words = Vec::new();

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--report" => show_report = true,
            "--config" => {
                let path = iter.next().ok_or_else(|| anyhow::anyhow!("--config 需要路径参数"))?;
                config_path = Some(PathBuf::from(path));
            }
            "--criteria" => {
                let json = iter.next().ok_or_else(|| anyhow::anyhow!("--criteria 需要 JSON 参数"))?;
                criteria = serde_json::from_str(&json)
                    .map_err(|e| anyhow::anyhow!("判据 JSON 解析失败: {}", e))?;
            }
            _ => goal_words.push(arg),
        }
    }
    if goal_words.is_empty() {
        usage();
    }
    Ok(CliArgs {
        goal_text: goal_words.join(" "),
        criteria,
        config_path,
        show_report,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ant::observability::init();

    let cli = parse_args(std::env::args().skip(1).collect())?;

    // 显式传入的配置文件加载失败直接报错，只有默认查找允许回退
    let config = match &cli.config_path {
        Some(path) => load_config(Some(path.clone()))
            .map_err(|e| anyhow::anyhow!("配置文件 {} 加载失败: {}", path.display(), e))?,
        None => load_config(None).unwrap_or_default(),
    };
    let agent = Agent::from_config(config)?;
    let mut goal = Goal::new(cli.goal_text);
    for (name, predicate) in cli.criteria {
        goal = goal.with_criterion(name, predicate);
    }
    let result = agent.run_goal(&goal).await;

    println!("状态: {:?}", result.status);
    println!("摘要: {}", result.summary);
    println!("尝试次数: {}", result.attempts_used);
    if let Some(strategy) = result.final_strategy {
        println!("最终策略: {}", strategy);
    }
    if let Some(question) = &result.question {
        println!("需要澄清: {}", question);
    }
    if !result.payload.as_object().map(|o| o.is_empty()).unwrap_or(true) {
        println!("载荷: {}", serde_json::to_string_pretty(&result.payload)?);
    }

    if cli.show_report {
        println!("\n工具可靠性报告:");
        for d in agent.reliability_report() {
            println!("  {:<24} 成功 {:>4}  失败 {:>4}", d.name, d.successes, d.failures);
        }
    }

    match result.status {
        GoalStatus::Succeeded => Ok(()),
        GoalStatus::NeedsClarification => std::process::exit(3),
        GoalStatus::Cancelled => std::process::exit(4),
        GoalStatus::Failed => std::process::exit(1),
    }
}
