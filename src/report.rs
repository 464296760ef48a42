//! Run summary and notification text

use crate::clock::BackupTimestamp;
use std::path::PathBuf;
use std::time::Duration;
use time::macros::format_description;
use time::UtcOffset;

/// Everything the notification reports about one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub source_path: PathBuf,
    pub bucket_name: String,
    pub started_at: BackupTimestamp,
    pub finished_at: BackupTimestamp,
    /// Entries attempted
    pub object_count: usize,
    pub error_count: usize,
}

impl RunSummary {
    pub fn duration(&self) -> Duration {
        self.finished_at.saturating_sub(self.started_at)
    }

    pub fn duration_minutes(&self) -> f64 {
        self.duration().as_secs_f64() / 60.0
    }
}

/// Render the chat message for a finished run
pub fn format_summary(summary: &RunSummary, offset: UtcOffset) -> String {
    let started = summary.started_at.to_offset_datetime(offset);
    let started = started
        .format(format_description!(
            "[year]/[month]/[day] [hour]:[minute]:[second]"
        ))
        .unwrap_or_else(|_| started.to_string());

    format!(
        "### ローカルファイルのバックアップが保存されました\n\
         バックアップ元ディレクトリ: {}\n\
         生成されたバケット名: {}\n\
         バックアップ開始時刻: {}\n\
         バックアップ所要時間: {:.6} 分\n\
         オブジェクト数: {}\n\
         エラー数: {}",
        summary.source_path.display(),
        summary.bucket_name,
        started,
        summary.duration_minutes(),
        summary.object_count,
        summary.error_count,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    fn summary() -> RunSummary {
        let start = datetime!(2024-03-05 09:30:07 +9);
        let started_at = BackupTimestamp::from_millis((start.unix_timestamp() * 1000) as u64);
        RunSummary {
            source_path: PathBuf::from("/data"),
            bucket_name: "bk-2024-3-5".to_string(),
            started_at,
            finished_at: started_at + Duration::from_secs(90),
            object_count: 2,
            error_count: 1,
        }
    }

    #[test]
    fn test_message_contents() {
        let message = format_summary(&summary(), offset!(+9));

        assert_eq!(
            message,
            "### ローカルファイルのバックアップが保存されました\n\
             バックアップ元ディレクトリ: /data\n\
             生成されたバケット名: bk-2024-3-5\n\
             バックアップ開始時刻: 2024/03/05 09:30:07\n\
             バックアップ所要時間: 1.500000 分\n\
             オブジェクト数: 2\n\
             エラー数: 1"
        );
    }

    #[test]
    fn test_start_time_follows_offset() {
        let message = format_summary(&summary(), offset!(UTC));
        assert!(message.contains("バックアップ開始時刻: 2024/03/05 00:30:07"));
    }

    #[test]
    fn test_deterministic() {
        let s = summary();
        assert_eq!(format_summary(&s, offset!(+9)), format_summary(&s, offset!(+9)));
    }

    #[test]
    fn test_duration_minutes() {
        let s = summary();
        assert_eq!(s.duration(), Duration::from_secs(90));
        assert!((s.duration_minutes() - 1.5).abs() < f64::EPSILON);
    }
}
