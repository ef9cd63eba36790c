//! Terminal operator prompt

use crate::domain::model::CatalogEntry;
use crate::domain::ports::{OperatorPrompt, RestoreNotice};
use crate::error::{Error, Result};
use async_trait::async_trait;
use dialoguer::{theme::ColorfulTheme, Confirm, Select};

/// [`OperatorPrompt`] backed by interactive terminal dialogs
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl TerminalPrompt {
    pub fn new() -> Self {
        Self
    }
}

fn catalog_line(entry: &CatalogEntry) -> String {
    format!(
        "{:>3}  backup {}  started {}",
        entry.catalog_id,
        entry.backup_id,
        entry.started_at.format("%Y-%m-%d %H:%M:%S")
    )
}

fn restore_question(notice: &RestoreNotice) -> String {
    let strategy = if notice.overwrite {
        "overwrite the data volume in place"
    } else {
        "copy the snapshot to a new volume and swap the host connections"
    };
    let mut question = format!(
        "Restore backup {} from snapshot {}? This stops the instance and will {}.",
        notice.backup_id, notice.snapshot, strategy
    );
    if notice.overwrite_forced {
        question.push_str(" The data volume is a virtual disk, so overwrite was selected automatically.");
    }
    question
}

async fn blocking<T, F>(dialog: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> std::result::Result<T, dialoguer::Error> + Send + 'static,
{
    tokio::task::spawn_blocking(dialog)
        .await
        .map_err(|e| Error::Internal(format!("prompt task failed: {}", e)))?
        .map_err(Error::from)
}

#[async_trait]
impl OperatorPrompt for TerminalPrompt {
    async fn select_backup(&self, entries: &[CatalogEntry]) -> Result<Option<usize>> {
        let items: Vec<String> = entries.iter().map(catalog_line).collect();
        let ids: Vec<usize> = entries.iter().map(|e| e.catalog_id).collect();

        let picked = blocking(move || {
            Select::with_theme(&ColorfulTheme::default())
                .with_prompt("Select the backup to restore (Esc to cancel)")
                .items(&items)
                .default(0)
                .interact_opt()
        })
        .await?;

        Ok(picked.and_then(|index| ids.get(index).copied()))
    }

    async fn confirm_restore(&self, notice: &RestoreNotice) -> Result<bool> {
        let question = restore_question(notice);
        blocking(move || {
            Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(question)
                .default(false)
                .interact()
        })
        .await
    }

    async fn notify(&self, message: &str) -> Result<()> {
        eprintln!("{}", message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::BackupId;
    use chrono::NaiveDate;

    #[test]
    fn test_catalog_line() {
        let entry = CatalogEntry {
            catalog_id: 2,
            backup_id: BackupId::from(1700000000123u64),
            started_at: NaiveDate::from_ymd_opt(2024, 3, 1)
                .and_then(|d| d.and_hms_opt(10, 15, 0))
                .unwrap(),
        };
        assert_eq!(catalog_line(&entry), "  2  backup 1700000000123  started 2024-03-01 10:15:00");
    }

    #[test]
    fn test_forced_overwrite_is_spelled_out() {
        let notice = RestoreNotice {
            backup_id: BackupId::from(42u64),
            snapshot: "hana-hn1-data.SAPHANA-42".into(),
            overwrite: true,
            overwrite_forced: true,
        };
        let question = restore_question(&notice);
        assert!(question.contains("overwrite the data volume in place"));
        assert!(question.contains("virtual disk"));

        let notice = RestoreNotice {
            overwrite: false,
            overwrite_forced: false,
            ..notice
        };
        let question = restore_question(&notice);
        assert!(question.contains("new volume"));
        assert!(!question.contains("virtual disk"));
    }
}
