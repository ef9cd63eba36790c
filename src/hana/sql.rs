//! SQL statements issued against the HANA control plane

use crate::domain::model::{BackupId, VolumeRole};

pub const MULTIDB_MODE: &str = "SELECT VALUE FROM M_INIFILE_CONTENTS WHERE FILE_NAME = 'global.ini' \
     AND SECTION = 'multidb' AND KEY = 'mode'";

pub const INSTANCE_ID: &str = "SELECT VALUE FROM SYS.M_SYSTEM_OVERVIEW WHERE NAME = 'Instance ID'";

pub const NAMESERVER_MASTER: &str =
    "SELECT HOST FROM SYS.M_SERVICES WHERE DETAIL = 'master' AND SERVICE_NAME = 'nameserver'";

pub const SNAPSHOT_CATALOG: &str = "SELECT BACKUP_ID, UTC_START_TIME FROM SYS.M_BACKUP_CATALOG \
     WHERE ENTRY_TYPE_NAME = 'data snapshot' ORDER BY SYS_END_TIME DESC";

pub const INACTIVE_TENANTS: &str = "SELECT DATABASE_NAME FROM M_DATABASES WHERE ACTIVE_STATUS = 'NO'";

pub fn basepath(role: VolumeRole) -> String {
    format!(
        "SELECT VALUE FROM M_INIFILE_CONTENTS WHERE FILE_NAME = 'global.ini' \
         AND SECTION = 'persistence' AND KEY = '{}' AND VALUE NOT LIKE '$%'",
        role.basepath_key()
    )
}

/// Volumes attached per host under the base path of `role` (scale-out)
pub fn attached_storages(role: VolumeRole) -> String {
    format!(
        "SELECT HOST, STORAGE_ID, PATH, KEY, VALUE FROM SYS.M_ATTACHED_STORAGES \
         WHERE KEY = 'WWID' AND PATH LIKE (SELECT CONCAT(VALUE, '%') FROM M_INIFILE_CONTENTS \
         WHERE FILE_NAME = 'global.ini' AND SECTION = 'persistence' AND KEY = '{}' \
         AND VALUE NOT LIKE '$%')",
        role.basepath_key()
    )
}

pub fn create_snapshot(comment: &str) -> String {
    format!(
        "BACKUP DATA FOR FULL SYSTEM CREATE SNAPSHOT COMMENT '{}'",
        escape(comment)
    )
}

pub fn prepared_backup_id(comment: &str) -> String {
    format!(
        "SELECT BACKUP_ID, COMMENT FROM M_BACKUP_CATALOG WHERE ENTRY_TYPE_NAME = 'data snapshot' \
         AND STATE_NAME = 'prepared' AND COMMENT = '{}'",
        escape(comment)
    )
}

pub fn close_snapshot_successful(backup_id: &BackupId, external_id: &str) -> String {
    format!(
        "BACKUP DATA FOR FULL SYSTEM CLOSE SNAPSHOT BACKUP_ID {} SUCCESSFUL '{}'",
        backup_id,
        escape(&format!("FlashArray Snapshot ID :{}", external_id))
    )
}

pub fn close_snapshot_unsuccessful(backup_id: &BackupId, reason: &str) -> String {
    format!(
        "BACKUP DATA FOR FULL SYSTEM CLOSE SNAPSHOT BACKUP_ID {} UNSUCCESSFUL '{}'",
        backup_id,
        escape(reason)
    )
}

pub fn recover_tenant(tenant: &str) -> String {
    format!("RECOVER DATA FOR {} USING SNAPSHOT CLEAR LOG", tenant)
}

fn escape(literal: &str) -> String {
    literal.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_snapshot_statements() {
        let id = BackupId::from(1634567890123);
        assert_eq!(
            close_snapshot_successful(&id, "6F2A9B"),
            "BACKUP DATA FOR FULL SYSTEM CLOSE SNAPSHOT BACKUP_ID 1634567890123 SUCCESSFUL \
             'FlashArray Snapshot ID :6F2A9B'"
        );
        assert!(close_snapshot_unsuccessful(&id, "no_value").ends_with("UNSUCCESSFUL 'no_value'"));
    }

    #[test]
    fn test_literals_are_escaped() {
        assert!(create_snapshot("it's").contains("'it''s'"));
    }

    #[test]
    fn test_basepath_key() {
        assert!(basepath(VolumeRole::Log).contains("'basepath_logvolumes'"));
        assert!(attached_storages(VolumeRole::Data).contains("'basepath_datavolumes'"));
    }
}
