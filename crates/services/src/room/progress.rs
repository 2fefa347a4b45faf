/// Aggregated view of room progress, useful for status lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomProgress {
    pub solved: usize,
    pub total: usize,
    pub current_stage: usize,
    /// Every stage solved.
    pub escaped: bool,
    pub locked: bool,
}
