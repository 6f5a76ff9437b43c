/// Recommended error type for a scenario `main` function. Phases return this type so that `?`
/// can be used to propagate errors.
pub type StressResult<T> = anyhow::Result<T>;
