//! Dangerous-command classifier
//!
//! Pure predicate over command text. Matches a fixed list of high-risk
//! invocations; the bridge uses it to attach operator warnings and cap
//! confidence on assistant output. It never blocks anything; the operator
//! stays in charge.

use std::sync::OnceLock;

use regex::RegexSet;

/// High-risk command patterns.
const DANGEROUS_PATTERNS: &[&str] = &[
    // Recursive removal at filesystem root
    r"\brm\s+(-[a-zA-Z]+\s+)*/(\*)?\s*$",
    // Raw device reads/writes
    r"\bdd\s+if=",
    r"\bof=/dev/",
    r">\s*/dev/(sd|hd)",
    // Filesystem/partition surgery
    r"\bmkfs",
    r"\bfdisk\b",
    // Machine lifecycle
    r"\b(shutdown|reboot|halt|poweroff)\b",
    // Killing init
    r"\bkill\s+(-\w+\s+)*1\s*$",
    // Broad process slaughter
    r"\bpkill\s+(-\w+\s+)*-f\b",
    r"\bkillall\b",
];

fn pattern_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| RegexSet::new(DANGEROUS_PATTERNS).expect("static patterns compile"))
}

/// True when the command matches any high-risk pattern.
pub fn is_dangerous(command: &str) -> bool {
    pattern_set().is_match(command.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_every_listed_pattern() {
        let dangerous = [
            "rm -rf /",
            "sudo rm -rf /*",
            "rm -fr /",
            "dd if=/dev/zero of=/dev/sda",
            "dd if=/dev/urandom of=disk.img",
            "mkfs.ext4 /dev/sdb1",
            "fdisk /dev/sda",
            "shutdown -h now",
            "reboot",
            "halt",
            "poweroff",
            "kill -9 1",
            "kill 1",
            "pkill -f python",
            "killall nginx",
            "cat garbage > /dev/sda",
        ];
        for cmd in dangerous {
            assert!(is_dangerous(cmd), "should flag: {}", cmd);
        }
    }

    #[test]
    fn test_safe_commands_pass() {
        let safe = [
            "ls -la",
            "cat /etc/os-release",
            "grep foo bar.txt",
            "rm -rf ./build",
            "rm old.log",
            "df -h",
            "ps aux",
            "kill -9 12345",
            "tail -f /var/log/syslog",
        ];
        for cmd in safe {
            assert!(!is_dangerous(cmd), "false positive: {}", cmd);
        }
    }

    #[test]
    fn test_classifier_is_deterministic() {
        for _ in 0..3 {
            assert!(is_dangerous("rm -rf /"));
            assert!(!is_dangerous("ls -la"));
        }
    }
}
