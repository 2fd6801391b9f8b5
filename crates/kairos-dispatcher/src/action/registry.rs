/// Whether a nested field holds one action or a list of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nesting {
    One,
    Many,
}

/// Declared shape of one action variant, used to infer untagged input.
#[derive(Debug)]
pub struct VariantSpec {
    pub name: &'static str,
    pub fields: &'static [&'static str],
    pub required: &'static [&'static str],
    pub nested: &'static [(&'static str, Nesting)],
}

const SEQUENCE_FIELDS: &[&str] = &["actions", "exception_on_no_success", "include_processing_info"];
const ACTIONS: &[(&str, Nesting)] = &[("actions", Nesting::Many)];

const fn leaf(name: &'static str, fields: &'static [&'static str]) -> VariantSpec {
    VariantSpec {
        name,
        fields,
        required: &[],
        nested: &[],
    }
}

pub const ACTION_VARIANTS: &[VariantSpec] = &[
    leaf("FileAppend", &["file", "payload", "header"]),
    leaf("GpioSet", &["pin", "value"]),
    leaf("GpioToggle", &["pin"]),
    leaf("GpioCleanup", &["pins"]),
    leaf("Sleep", &["seconds"]),
    leaf("SysInfo", &[]),
    leaf("LocalInfo", &[]),
    leaf("Success", &[]),
    leaf("Failure", &["message"]),
    leaf("Terminate", &[]),
    VariantSpec {
        name: "Vals",
        fields: &["vals"],
        required: &["vals"],
        nested: &[],
    },
    VariantSpec {
        name: "Result",
        fields: &["value"],
        required: &["value"],
        nested: &[],
    },
    VariantSpec {
        name: "Fail",
        fields: &["operand"],
        required: &["operand"],
        nested: &[("operand", Nesting::One)],
    },
    VariantSpec {
        name: "RaiseCmp",
        fields: &["value", "cmp"],
        required: &["value", "cmp"],
        nested: &[],
    },
    VariantSpec {
        name: "All",
        fields: SEQUENCE_FIELDS,
        required: &["actions"],
        nested: ACTIONS,
    },
    VariantSpec {
        name: "UntilSuccess",
        fields: SEQUENCE_FIELDS,
        required: &["actions"],
        nested: ACTIONS,
    },
    VariantSpec {
        name: "UntilFailure",
        fields: SEQUENCE_FIELDS,
        required: &["actions"],
        nested: ACTIONS,
    },
    VariantSpec {
        name: "IfElse",
        fields: &["test", "else_action", "if_action"],
        required: &["test", "else_action"],
        nested: &[
            ("test", Nesting::One),
            ("else_action", Nesting::One),
            ("if_action", Nesting::One),
        ],
    },
    VariantSpec {
        name: "Compose",
        fields: &["actions"],
        required: &["actions"],
        nested: ACTIONS,
    },
    VariantSpec {
        name: "Exec",
        fields: &["server_name", "action_name"],
        required: &["action_name"],
        nested: &[],
    },
    VariantSpec {
        name: "ExecSupplied",
        fields: &["server_name", "action"],
        required: &["action"],
        nested: &[("action", Nesting::One)],
    },
    VariantSpec {
        name: "ExecKeyTags",
        fields: &["action_name", "key_tags", "mode"],
        required: &["action_name", "key_tags"],
        nested: &[],
    },
    VariantSpec {
        name: "ExecSuppliedKeyTags",
        fields: &["action", "key_tags", "mode"],
        required: &["action", "key_tags"],
        nested: &[("action", Nesting::One)],
    },
    VariantSpec {
        name: "ScheduleAction",
        fields: &["scheduler_name", "action_name"],
        required: &["scheduler_name", "action_name"],
        nested: &[],
    },
    VariantSpec {
        name: "UnscheduleAction",
        fields: &["scheduler_name", "action_name"],
        required: &["scheduler_name", "action_name"],
        nested: &[],
    },
    VariantSpec {
        name: "UnscheduleScheduler",
        fields: &["scheduler_name"],
        required: &["scheduler_name"],
        nested: &[],
    },
    VariantSpec {
        name: "DeferAction",
        fields: &["scheduler_name", "action_name", "wait_until", "delay_seconds"],
        required: &["scheduler_name", "action_name"],
        nested: &[],
    },
    VariantSpec {
        name: "ExpireAction",
        fields: &["scheduler_name", "action_name", "expire_on", "delay_seconds"],
        required: &["scheduler_name", "action_name"],
        nested: &[],
    },
    VariantSpec {
        name: "ScheduleProgram",
        fields: &["program_name", "start", "stop", "duration_seconds"],
        required: &["program_name"],
        nested: &[],
    },
    leaf("ClearAllScheduling", &[]),
];

pub(crate) fn spec_for(name: &str) -> Option<&'static VariantSpec> {
    ACTION_VARIANTS.iter().find(|v| v.name == name)
}
