// Result of one lookup, handed to the rendering layer exactly once

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentResult {
    pub seat_number: String,
    pub student_name: String,
    pub region: String,
    pub school: String,
    pub total: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Found(StudentResult),
    /// The upstream answered but holds no record for the seat number.
    NotFound,
    /// Retries exhausted or a terminal error; `last_error` is safe to display.
    Failed { attempts: u32, last_error: String },
}

impl LookupOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            LookupOutcome::Found(_) => "found",
            LookupOutcome::NotFound => "not_found",
            LookupOutcome::Failed { .. } => "failed",
        }
    }
}
