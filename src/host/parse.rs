//! Parsers for guest OS command output

use serde::{Deserialize, Serialize};

/// Device mounted at exactly `mount_point` in `df -P` output
pub fn mounted_device(lines: &[String], mount_point: &str) -> Option<String> {
    let wanted = normalize_mount(mount_point);
    lines
        .iter()
        .skip_while(|line| line.starts_with("Filesystem"))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 6 {
                return None;
            }
            let mounted_on = fields[5..].join(" ");
            (normalize_mount(&mounted_on) == wanted).then(|| fields[0].to_string())
        })
        .next()
}

fn normalize_mount(mount_point: &str) -> &str {
    match mount_point.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

/// Value of `key` in `udevadm info --query=property` output
pub fn udev_property(lines: &[String], key: &str) -> Option<String> {
    lines.iter().find_map(|line| {
        let (name, value) = line.trim().split_once('=')?;
        (name == key && !value.trim().is_empty()).then(|| value.trim().to_string())
    })
}

/// Run state of the HANA instance as reported by `sapcontrol`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    Running,
    Stopped,
    /// Any other daemon state (starting, stopping, yellow)
    Other(String),
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceStatus::Running => write!(f, "Running"),
            InstanceStatus::Stopped => write!(f, "Stopped"),
            InstanceStatus::Other(status) => write!(f, "{}", status),
        }
    }
}

const DAEMON_PROCESS: &str = "hdbdaemon";

/// Status of the `hdbdaemon` process in `sapcontrol -function
/// GetProcessList` output.
///
/// Columns are located through the header row, so extra banner lines
/// before the table do not matter.
pub fn daemon_status(lines: &[String]) -> Option<InstanceStatus> {
    let split = |line: &str| -> Vec<String> {
        line.split(',').map(|field| field.trim().to_string()).collect()
    };

    let header_at = lines
        .iter()
        .position(|line| split(line).iter().any(|f| f == "textstatus"))?;
    let header = split(&lines[header_at]);
    let name_col = header.iter().position(|f| f == "name")?;
    let status_col = header.iter().position(|f| f == "textstatus")?;

    lines[header_at + 1..]
        .iter()
        .map(|line| split(line))
        .find(|fields| fields.get(name_col).map(String::as_str) == Some(DAEMON_PROCESS))
        .and_then(|fields| fields.get(status_col).cloned())
        .map(|status| match status.as_str() {
            "Running" => InstanceStatus::Running,
            "Stopped" => InstanceStatus::Stopped,
            _ => InstanceStatus::Other(status),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{df_listing, process_list, udev_properties};

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_mounted_device_exact_match() {
        let mut listing = lines(&df_listing("/dev/mapper/3624a9370aa", "/hana/data"));
        listing.push("/dev/mapper/3624a9370bb 1 1 1 1% /hana/data2".into());

        assert_eq!(
            mounted_device(&listing, "/hana/data/").as_deref(),
            Some("/dev/mapper/3624a9370aa")
        );
        assert_eq!(
            mounted_device(&listing, "/hana/data2").as_deref(),
            Some("/dev/mapper/3624a9370bb")
        );
        assert_eq!(mounted_device(&listing, "/hana/log"), None);
        assert_eq!(mounted_device(&listing, "/").as_deref(), Some("/dev/sda2"));
    }

    #[test]
    fn test_udev_property() {
        let output = lines(&udev_properties("3624a9370f6b1e4c8d2a3b5c4"));
        assert_eq!(
            udev_property(&output, "DM_SERIAL").as_deref(),
            Some("3624a9370f6b1e4c8d2a3b5c4")
        );
        assert_eq!(udev_property(&output, "ID_WWN"), None);
    }

    #[test]
    fn test_daemon_status() {
        let output = process_list("GRAY", "Stopped");
        assert_eq!(daemon_status(&output.stdout), Some(InstanceStatus::Stopped));

        let output = process_list("GREEN", "Running");
        assert_eq!(daemon_status(&output.stdout), Some(InstanceStatus::Running));

        let output = process_list("YELLOW", "Initializing");
        assert_eq!(
            daemon_status(&output.stdout),
            Some(InstanceStatus::Other("Initializing".into()))
        );
    }

    #[test]
    fn test_daemon_status_without_table() {
        assert_eq!(daemon_status(&lines("FAIL: NIECONN_REFUSED")), None);
    }
}
