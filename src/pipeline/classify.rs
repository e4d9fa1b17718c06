//! Member classification: filename prefix → handling actions.

/// Set of handling actions for one archive member.
///
/// Members can carry more than one action (the binary logs that support staff
/// want both decoded and raw are `DECODE | COPY`), so this is a small bitset
/// rather than an enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actions(u8);

impl Actions {
    /// Pass the member through byte-exact under its original name.
    pub const COPY: Actions = Actions(1);
    /// Recover a v2-obfuscated text payload, keeping the name.
    pub const DECRYPT: Actions = Actions(1 << 1);
    /// Render a binary payload as text under `<stem>.txt`.
    pub const DECODE: Actions = Actions(1 << 2);

    pub const fn union(self, other: Actions) -> Actions {
        Actions(self.0 | other.0)
    }

    pub fn contains(self, other: Actions) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Actions {
    type Output = Actions;

    fn bitor(self, rhs: Actions) -> Actions {
        self.union(rhs)
    }
}

/// Prefix search only, against the uppercased member name.
const HANDLING_TABLE: &[(&str, Actions)] = &[
    ("VX", Actions::DECRYPT),
    ("LXDMESG", Actions::DECRYPT),
    ("DROBODIAG_", Actions::DECRYPT),
    ("EVENTLOG", Actions::DECODE),
    ("DISKLOG", Actions::DECODE),
    ("FLASHLOG", Actions::DECODE),
    ("PERFLOG", Actions::DECODE.union(Actions::COPY)),
    ("ZONETABLE", Actions::DECODE.union(Actions::COPY)),
];

/// Map a member name to its actions. Total: anything the table does not
/// claim is copied.
pub fn classify(name: &str) -> Actions {
    let upper = name.to_uppercase();
    for (prefix, actions) in HANDLING_TABLE {
        if upper.starts_with(prefix) {
            return *actions;
        }
    }
    Actions::COPY
}

/// Output name for a decoded member: everything before the first dot plus
/// `.txt`.
pub fn decoded_name(name: &str) -> String {
    let stem = name.split('.').next().unwrap_or(name);
    format!("{stem}.txt")
}

/// Insert `suffix` at the end of the stem, keeping the extension chain:
/// `diags.zip` + `_d` → `diags_d.zip`. Used for the standalone output names.
pub fn append_to_stem(name: &str, suffix: &str) -> String {
    match name.split_once('.') {
        Some((stem, rest)) => format!("{stem}{suffix}.{rest}"),
        None => format!("{name}{suffix}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_case_insensitive() {
        assert_eq!(classify("vxLockedDiags.txt"), Actions::DECRYPT);
        assert_eq!(classify("VXLIVELOG.TXT"), Actions::DECRYPT);
        assert_eq!(classify("LxDmesg.log"), Actions::DECRYPT);
        assert_eq!(classify("droboDiag_20200913.txt"), Actions::DECRYPT);
        assert_eq!(classify("eventlog.bin"), Actions::DECODE);
        assert_eq!(classify("DiskLog.bin"), Actions::DECODE);
        assert_eq!(classify("flashlog.bin"), Actions::DECODE);
    }

    #[test]
    fn dual_action_members() {
        let actions = classify("perflog.bin");
        assert!(actions.contains(Actions::DECODE));
        assert!(actions.contains(Actions::COPY));
        assert!(!actions.contains(Actions::DECRYPT));
        assert_eq!(classify("zonetable.bin"), Actions::DECODE | Actions::COPY);
    }

    #[test]
    fn totality() {
        for name in ["readme.txt", "", "host.log", "some/dir/file", "unknown.bin"] {
            let actions = classify(name);
            assert!(
                actions.contains(Actions::COPY)
                    || actions.contains(Actions::DECRYPT)
                    || actions.contains(Actions::DECODE),
                "{name:?} resolved to no actions"
            );
        }
    }

    #[test]
    fn decoded_names() {
        assert_eq!(decoded_name("perflog.bin"), "perflog.txt");
        assert_eq!(decoded_name("eventlog.crash.bin"), "eventlog.txt");
        assert_eq!(decoded_name("zonetable"), "zonetable.txt");
    }

    #[test]
    fn stem_suffixes() {
        assert_eq!(append_to_stem("diags.zip", "_d"), "diags_d.zip");
        assert_eq!(append_to_stem("zone.table.dat", "_txt"), "zone_txt.table.dat");
        assert_eq!(append_to_stem("noext", "_d"), "noext_d");
    }
}
