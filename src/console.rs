use std::io::Write;

use anyhow::{Context, Result};
use chrono::Local;

use crate::project::Project;
use crate::record::Record;
use crate::tag::Tag;
use crate::task::Task;
use crate::time_entry::{format_minutes, group_by_day, TimeEntry};

/// 一覧に表示する名前を持つレコード。
pub trait Named: Record {
    fn name(&self) -> &str;
}

impl Named for Project {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for Task {
    fn name(&self) -> &str {
        &self.task_name
    }
}

impl Named for Tag {
    fn name(&self) -> &str {
        &self.tag_name
    }
}

/// Consoleにレコードを表示するためのtrait。
pub trait ConsolePresenter {
    /// タイムエントリーを日毎にまとめて表示する。
    ///
    /// # Arguments
    ///
    /// * `time_entries` - 表示するタイムエントリー
    fn show_time_entries(&mut self, time_entries: &[TimeEntry]) -> Result<()>;

    /// プロジェクト、タスク、タグを表示する。既定のレコードには印を付ける。
    fn show_items<N: Named>(&mut self, items: &[N]) -> Result<()>;
}

/// Markdownのlist形式で表示する。
pub struct ConsoleMarkdownList<'a, W: Write> {
    writer: &'a mut W,
}

impl<'a, W: Write> ConsoleMarkdownList<'a, W> {
    /// 新しい`ConsoleMarkdownList`を返す。
    pub fn new(writer: &'a mut W) -> Self {
        Self { writer }
    }
}

impl<'a, W: Write> ConsolePresenter for ConsoleMarkdownList<'a, W> {
    fn show_time_entries(&mut self, time_entries: &[TimeEntry]) -> Result<()> {
        for group in group_by_day(time_entries) {
            writeln!(
                self.writer,
                "## {} ({})",
                group.date,
                format_minutes(group.total_minutes())
            )
            .with_context(|| format!("Failed to write day: {}", group.date))?;

            let mut sorted_entries = group.entries;
            sorted_entries.sort_by_key(|entry| entry.start_time);
            for entry in sorted_entries {
                writeln!(self.writer, "{}", entry_line(&entry))
                    .with_context(|| format!("Failed to write time entry: {:?}", entry))?;
            }
        }

        Ok(())
    }

    fn show_items<N: Named>(&mut self, items: &[N]) -> Result<()> {
        for item in items {
            let marker = if item.is_default() { " [default]" } else { "" };
            writeln!(self.writer, "- {} ({}){}", item.name(), item.id(), marker)
                .with_context(|| format!("Failed to write {}", item.id()))?;
        }

        Ok(())
    }
}

/// `- 09:00 ~ 10:30 (01:30) Project: label`形式の1行を返す。
fn entry_line(entry: &TimeEntry) -> String {
    let start_str = entry
        .start_time
        .with_timezone(&Local)
        .format("%H:%M")
        .to_string();
    let (end_str, duration_str) = match entry.end_time {
        Some(end) => (
            end.with_timezone(&Local).format("%H:%M").to_string(),
            format_minutes(entry.duration),
        ),
        None => ("now".to_string(), "running".to_string()),
    };
    let mut line = format!(
        "- {} ~ {} ({}) {}",
        start_str,
        end_str,
        duration_str,
        entry.project_name().unwrap_or("-")
    );
    if let Some(label) = &entry.label {
        line.push_str(": ");
        line.push_str(label);
    }
    line
}
