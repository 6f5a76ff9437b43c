use tabled::Tabled;

#[derive(Debug, Clone, Tabled)]
pub struct RoundRow {
    pub round: usize,
    pub completed: usize,
    pub timed_out: usize,
    pub abandoned: usize,
    pub still_running: usize,
    #[tabled(display = "float2")]
    pub elapsed_ms: f64,
    pub passed: bool,
}

fn float2(n: &f64) -> String {
    format!("{:.2}", n)
}
