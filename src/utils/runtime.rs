use anyhow::Result;

/// The capture loop is a single cooperative worker, so one thread is all it needs.
pub fn single_thread_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .thread_name("trackono")
        .build()?)
}
