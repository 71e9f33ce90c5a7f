use super::connect;
use anyhow::Result;
use prism_ctl::TaskList;
use std::time::Duration;

/// Print the task list, optionally waiting for a change from `rev`
pub async fn run_tasks(addr: &str, timeout: Duration, rev: Option<String>) -> Result<()> {
    let client = connect(addr, timeout).await?;
    let have_rev = rev.unwrap_or_default();
    let list = client.task_list(have_rev.as_bytes()).await?;
    print_tasks(&list);
    Ok(())
}

/// Cancel a task, optionally only at revision `rev`
pub async fn run_cancel(
    addr: &str,
    timeout: Duration,
    task_id: &str,
    rev: Option<String>,
) -> Result<()> {
    let client = connect(addr, timeout).await?;
    client
        .cancel_task(task_id, rev.as_deref().map(str::as_bytes))
        .await?;
    println!("Canceled task {}", task_id);
    Ok(())
}

fn print_tasks(list: &TaskList) {
    println!("Task list revision: {}", list.rev);
    println!();

    if list.tasks.is_empty() {
        println!("No tasks");
        return;
    }

    println!(
        "{:<30} {:<10} {:<8} {:<8} {:>9} {:<10}",
        "ID", "TYPE", "STATUS", "REV", "PROGRESS", "CANCELABLE"
    );
    println!("{}", "-".repeat(80));
    for task in &list.tasks {
        println!(
            "{:<30} {:<10} {:<8} {:<8} {:>8.1}% {:<10}",
            task.id,
            task.task_type.as_str(),
            task.status.as_str(),
            task.rev.to_string(),
            task.progress * 100.0,
            task.is_cancelable,
        );
    }

    for task in &list.tasks {
        let detailed = task.detailed_progress.as_ref().filter(|d| !d.is_empty());
        if detailed.is_none() && task.error_message.is_empty() {
            continue;
        }

        println!();
        println!("{}", task.id);
        if let Some(detailed) = detailed {
            for (node, progress) in detailed {
                println!("  {:<26} {:>8.1}%", node, progress * 100.0);
            }
        }
        for line in task.error_message.lines() {
            println!("  error: {}", line);
        }
    }
}
