//! Parameter table: the ids a peer may read and write with
//! `GET_PARAM`/`SET_PARAM`.

/// One addressable parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub id: u8,
    /// Key used in the defaults store.
    pub name: &'static str,
    pub settable: bool,
    pub non_negative: bool,
}

pub const PARAM_1: u8 = 0;
pub const PARAM_2: u8 = 1;
pub const PARAM_1_TH: u8 = 2;
pub const PARAM_2_TH: u8 = 3;
pub const MIN_DELAY: u8 = 4;

pub const PARAMS: &[ParamSpec] = &[
    ParamSpec {
        id: PARAM_1,
        name: "param_1",
        settable: false,
        non_negative: false,
    },
    ParamSpec {
        id: PARAM_2,
        name: "param_2",
        settable: false,
        non_negative: false,
    },
    ParamSpec {
        id: PARAM_1_TH,
        name: "param_1_th",
        settable: true,
        non_negative: false,
    },
    ParamSpec {
        id: PARAM_2_TH,
        name: "param_2_th",
        settable: true,
        non_negative: false,
    },
    ParamSpec {
        id: MIN_DELAY,
        name: "min_delay",
        settable: true,
        non_negative: true,
    },
];

pub fn lookup(id: u8) -> Option<&'static ParamSpec> {
    PARAMS.iter().find(|p| p.id == id)
}

/// Checks that ids are dense from zero and names are unique. Run once when a
/// node is built so a bad edit to the table fails at startup, not mid-session.
pub fn validate_table(table: &[ParamSpec]) -> Result<(), String> {
    for (i, entry) in table.iter().enumerate() {
        if entry.id as usize != i {
            return Err(format!("param '{}' has id {}, expected {}", entry.name, entry.id, i));
        }
        if table[..i].iter().any(|p| p.name == entry.name) {
            return Err(format!("duplicate param name '{}'", entry.name));
        }
    }
    Ok(())
}
