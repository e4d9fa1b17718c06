//! Anchor-point indexing of decrypted diagnostic text.
//!
//! Large diagnostic dumps are naturally segmented by demarcation lines
//! (`----- EVENT LOG -----`, `Invoking DiagnosticHandler function for ...`).
//! This module scans a decrypted text stream against a per-file-class rule
//! set and produces a navigable index of those section starts. Every rule
//! assumes its demarcation string sits at the start of a line, which keeps
//! the scan a cheap prefix test per rule.
//!
//! The index is a plain data structure (JSON-exportable); rendering it is a
//! consumer concern.

use regex::Regex;
use serde::Serialize;

// ── Rules ────────────────────────────────────────────────────────────────────

/// How a matched demarcation line becomes an index label.
#[derive(Debug, Clone, Copy)]
enum LabelRule {
    /// Use the line as-is.
    Verbatim,
    /// Fixed label regardless of line content.
    Replace(&'static str),
    /// Regex search/replace over the matched line.
    Rewrite(&'static str, &'static str),
    /// Regex search/replace over the line after the match.
    NextLine(&'static str, &'static str),
}

/// One demarcation rule: line prefix, index indent level, label derivation.
#[derive(Debug, Clone, Copy)]
struct SectionRule {
    prefix: &'static str,
    indent: u8,
    label: LabelRule,
}

const SECTION: LabelRule =
    LabelRule::Rewrite("([[:punct:]]* )([[:word:][:space:]]*)( [[:punct:]]*)", "${2}");
const SECTION_WITH_PATH: LabelRule = LabelRule::Rewrite(
    "([[:punct:]]* )([[:punct:][:word:][:space:]]*)( [[:punct:]]*)",
    "${2}",
);
const DIAG_HANDLER: LabelRule = LabelRule::Rewrite(
    "(Invoking DiagnosticHandler function for )([[:word:]]*) ([[:print:]]*)",
    "${2} Diagnostics",
);
const ISCSI_DIAGNOSTICS: LabelRule = LabelRule::Rewrite(
    "([[:punct:]]* )(Diagnostics : )([[:word:][:space:]]*)( [[:punct:]]*)",
    "${3} Diagnostics",
);
const CRASH_NEXT_LINE: LabelRule = LabelRule::NextLine("([[:print:]]*)", "Crash ${1}");

const VX_LOCKED_DIAGS: &[SectionRule] = &[
    SectionRule { prefix: "Invoking DiagnosticHandler function for", indent: 2, label: DIAG_HANDLER },
    SectionRule { prefix: "-------------------- LOCKED DIAGS -----------------------", indent: 1, label: SECTION },
    SectionRule { prefix: "----------------------- EVENT LOG -----------------------", indent: 2, label: SECTION },
    SectionRule { prefix: "--------------------- DISK EVENT LOG --------------------", indent: 2, label: SECTION },
    SectionRule { prefix: "-------------------- KERNEL DIAGS -----------------------", indent: 1, label: SECTION },
    SectionRule { prefix: "Contents of", indent: 2, label: LabelRule::Verbatim },
];

const VX_LX_CRASH_LOG: &[SectionRule] = &[
    SectionRule { prefix: "-------------------- CRASH LOG FLASH FILE START --------------------", indent: 1, label: CRASH_NEXT_LINE },
    SectionRule { prefix: "KERNEL FULLY INITIALIZED", indent: 2, label: LabelRule::Replace("Kernel Initialized") },
    SectionRule { prefix: "Vx Kernel (A)utomated (M)emory (I)ntegrity (T)est ...", indent: 2, label: LabelRule::Replace("AMIT Memory Test Results") },
    SectionRule { prefix: "--- Diagnostics", indent: 2, label: ISCSI_DIAGNOSTICS },
    SectionRule { prefix: "--- iSCSI Target Log File", indent: 1, label: SECTION },
    SectionRule { prefix: "Invoking DiagnosticHandler function for", indent: 3, label: DIAG_HANDLER },
    SectionRule { prefix: "-------------------- LOCKED DIAGS -----------------------", indent: 1, label: SECTION },
    SectionRule { prefix: "----------------------- EVENT LOG -----------------------", indent: 2, label: SECTION },
    SectionRule { prefix: "--------------------- DISK EVENT LOG --------------------", indent: 2, label: SECTION },
    SectionRule { prefix: "-------------------- KERNEL DIAGS -----------------------", indent: 1, label: SECTION },
    SectionRule { prefix: "Contents of", indent: 2, label: LabelRule::Verbatim },
    SectionRule { prefix: "Assertion failed", indent: 2, label: LabelRule::Verbatim },
    SectionRule { prefix: "---------------- LX CRASH LOG FILE START : (copy of previous boot log)  -------------------", indent: 2, label: SECTION },
    SectionRule { prefix: "<!----- Log starts -------!>", indent: 3, label: SECTION },
];

const VX_LIVE_LOG: &[SectionRule] = &[
    SectionRule { prefix: "========== LIVE CONSOLE OUTPUT START =======", indent: 1, label: SECTION },
    SectionRule { prefix: "KERNEL FULLY INITIALIZED", indent: 2, label: LabelRule::Replace("Kernel Initialized") },
    SectionRule { prefix: "Vx Kernel (A)utomated (M)emory (I)ntegrity (T)est ...", indent: 2, label: LabelRule::Replace("AMIT Memory Test Results") },
];

const LX_LOG_ROTATED: &[SectionRule] =
    &[SectionRule { prefix: "### ", indent: 2, label: SECTION_WITH_PATH }];

const LX_ISCSI_DIAGS: &[SectionRule] = &[
    SectionRule { prefix: "/bin", indent: 2, label: LabelRule::Verbatim },
    SectionRule { prefix: "/sbin", indent: 2, label: LabelRule::Verbatim },
    SectionRule { prefix: "/var", indent: 2, label: LabelRule::Verbatim },
    SectionRule { prefix: "/tmp", indent: 2, label: LabelRule::Verbatim },
    SectionRule { prefix: "/etc", indent: 2, label: LabelRule::Verbatim },
    SectionRule { prefix: "<!----- Log starts -------!>", indent: 1, label: SECTION },
    SectionRule { prefix: "--- Diagnostics", indent: 2, label: ISCSI_DIAGNOSTICS },
    SectionRule { prefix: "--- iSCSI Target Log File", indent: 1, label: SECTION },
];

const LX_SYSTEMINFO: &[SectionRule] = &[
    SectionRule { prefix: "/bin", indent: 2, label: LabelRule::Verbatim },
    SectionRule { prefix: "/sbin", indent: 2, label: LabelRule::Verbatim },
    SectionRule { prefix: "/var", indent: 2, label: LabelRule::Verbatim },
    SectionRule { prefix: "/tmp", indent: 2, label: LabelRule::Verbatim },
    SectionRule { prefix: "/etc", indent: 2, label: LabelRule::Verbatim },
    SectionRule { prefix: "/mnt", indent: 2, label: LabelRule::Verbatim },
    SectionRule { prefix: "/.ash_history", indent: 2, label: LabelRule::Verbatim },
];

const VX_PERFLOG: &[SectionRule] =
    &[SectionRule { prefix: "Statistic", indent: 2, label: LabelRule::Verbatim }];

const BASE: &[SectionRule] = &[];

/// Rule set for a member name. Files without a known class get the empty
/// base set, which indexes nothing.
fn rules_for(name: &str) -> &'static [SectionRule] {
    let upper = name.to_uppercase();
    if upper.starts_with("VXLOCKEDDIAGS") {
        VX_LOCKED_DIAGS
    } else if upper.starts_with("VXLXCLOG") {
        VX_LX_CRASH_LOG
    } else if upper.starts_with("VXLIVELOG") {
        VX_LIVE_LOG
    } else if upper.starts_with("DAPPS") || upper.ends_with(".LOG") {
        LX_LOG_ROTATED
    } else if upper.starts_with("LXDMESGISCSI") {
        LX_ISCSI_DIAGS
    } else if upper.starts_with("LXSYSTEMINFO") {
        LX_SYSTEMINFO
    } else if upper.starts_with("PERFLOG") {
        VX_PERFLOG
    } else {
        BASE
    }
}

// ── Index ────────────────────────────────────────────────────────────────────

/// One anchor point in the indexed text.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Anchor {
    /// Zero-based line number of the demarcation line.
    pub line: usize,
    /// Which rule matched (index into the file class's rule set).
    pub rule: usize,
    pub indent: u8,
    /// Anchor identifier (the line number, stringified).
    pub anchor: String,
    /// Human-readable section label.
    pub label: String,
    /// Line number of the preceding anchor; the first anchor points at itself.
    pub previous: usize,
    /// Line number of the following anchor; the last anchor points at itself.
    pub next: usize,
}

/// Index of anchor points over one decrypted text stream.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnchorIndex {
    pub anchors: Vec<Anchor>,
}

impl AnchorIndex {
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

fn apply_label(rule: LabelRule, lines: &[&str], line: usize) -> String {
    let input = lines[line];
    match rule {
        LabelRule::Verbatim => input.to_string(),
        LabelRule::Replace(label) => label.to_string(),
        LabelRule::Rewrite(search, replace) => rewrite(input, search, replace),
        LabelRule::NextLine(search, replace) => {
            let follow = lines.get(line + 1).copied().unwrap_or("");
            rewrite(follow, search, replace)
        }
    }
}

fn rewrite(input: &str, search: &str, replace: &str) -> String {
    match Regex::new(search) {
        // First match only: the demarcation patterns cover the whole line,
        // and some of them can match empty at end-of-line.
        Ok(re) => re.replace(input, replace).into_owned(),
        // The patterns are fixed; an invalid one degrades to the raw line.
        Err(_) => input.to_string(),
    }
}

/// Scan `text` with the rule set for `name` and build the anchor index.
pub fn index_text(name: &str, text: &str) -> AnchorIndex {
    let rules = rules_for(name);
    let lines: Vec<&str> = text.split('\n').collect();
    let mut anchors = Vec::new();

    for (line_num, line) in lines.iter().enumerate() {
        for (rule_num, rule) in rules.iter().enumerate() {
            if line.starts_with(rule.prefix) {
                anchors.push(Anchor {
                    line: line_num,
                    rule: rule_num,
                    indent: rule.indent,
                    anchor: line_num.to_string(),
                    label: apply_label(rule.label, &lines, line_num),
                    previous: 0,
                    next: 0,
                });
                break;
            }
        }
    }

    // Chain neighbours; endpoints point at themselves.
    for i in 0..anchors.len() {
        anchors[i].previous = if i == 0 { anchors[i].line } else { anchors[i - 1].line };
        anchors[i].next = if i + 1 == anchors.len() {
            anchors[i].line
        } else {
            anchors[i + 1].line
        };
    }

    AnchorIndex { anchors }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCKED_DIAGS: &str = "\
-------------------- LOCKED DIAGS -----------------------
some preamble
Invoking DiagnosticHandler function for CatMgr 0x1234
cat manager output
----------------------- EVENT LOG -----------------------
event 1
event 2
";

    #[test]
    fn locked_diags_sections() {
        let index = index_text("vxLockedDiags.txt", LOCKED_DIAGS);
        let labels: Vec<&str> = index.anchors.iter().map(|a| a.label.as_str()).collect();
        assert_eq!(labels, ["LOCKED DIAGS", "CatMgr Diagnostics", "EVENT LOG"]);
        assert_eq!(index.anchors[0].indent, 1);
        assert_eq!(index.anchors[1].indent, 2);
        assert_eq!(index.anchors[1].line, 2);
    }

    #[test]
    fn neighbour_chaining() {
        let index = index_text("vxLockedDiags.txt", LOCKED_DIAGS);
        assert_eq!(index.anchors[0].previous, index.anchors[0].line);
        assert_eq!(index.anchors[0].next, index.anchors[1].line);
        assert_eq!(index.anchors[1].previous, index.anchors[0].line);
        assert_eq!(index.anchors[2].next, index.anchors[2].line);
    }

    #[test]
    fn crash_log_labels_from_next_line() {
        let text = "\
-------------------- CRASH LOG FLASH FILE START --------------------
Exception in thread scsiTask
backtrace follows
";
        let index = index_text("VxLxCLog.txt", text);
        assert_eq!(index.anchors[0].label, "Crash Exception in thread scsiTask");
    }

    #[test]
    fn fixed_replacement_labels() {
        let text = "KERNEL FULLY INITIALIZED at tick 99\n";
        let index = index_text("vxLiveLog.txt", text);
        assert_eq!(index.anchors[0].label, "Kernel Initialized");
    }

    #[test]
    fn unknown_class_indexes_nothing() {
        let index = index_text("readme.txt", LOCKED_DIAGS);
        assert!(index.is_empty());
    }

    #[test]
    fn rotated_log_class_by_suffix() {
        let text = "### /var/log/messages ###\nline\n";
        let index = index_text("messages.log", text);
        assert_eq!(index.anchors.len(), 1);
        assert_eq!(index.anchors[0].label, "/var/log/messages");
    }

    #[test]
    fn perflog_statistics_anchor() {
        let text = "PerfLog: IOPS PauseReason 0\nStatistic 'IOPS' : io log\ndata\n";
        let index = index_text("perflog.txt", text);
        assert_eq!(index.anchors.len(), 1);
        assert_eq!(index.anchors[0].line, 1);
    }

    #[test]
    fn json_export() {
        let index = index_text("vxLockedDiags.txt", LOCKED_DIAGS);
        let bytes = index.to_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"label\":\"LOCKED DIAGS\""));
    }
}
