//! The one blocking surface: drive an async future to completion.

use std::future::Future;

/// Runs `future` on a fresh current-thread runtime.
///
/// Must not be called from inside another tokio runtime.
pub fn run<F: Future>(future: F) -> std::io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(future))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_to_completion() {
        let value = run(async {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            21 * 2
        })
        .unwrap();
        assert_eq!(value, 42);
    }
}
