use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    ImagePositionPatient,
    TablePosition,
    InstanceNumber,
    None,
}

/// Which operand of a label combine keeps its value where both are foreground.
///
/// Background (0) never overwrites a label, whichever policy is chosen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinePolicy {
    /// `combine(a, b)` keeps `a` on conflict. The pipeline passes the label
    /// being committed as `a`, so the later-processed label wins.
    #[default]
    FirstOverwrites,
    /// `combine(a, b)` keeps `b` on conflict, i.e. labels committed earlier
    /// are never overwritten.
    SecondOverwrites,
}
