use std::any::Any;

/// Turns the opaque payload of a caught panic into a readable error.
pub(crate) fn try_to_extract_panic_info(info: &(dyn Any + Send)) -> anyhow::Error {
    if let Some(message) = info.downcast_ref::<String>() {
        anyhow::anyhow!("job panicked: {message}")
    } else if let Some(message) = info.downcast_ref::<&str>() {
        anyhow::anyhow!("job panicked: {message}")
    } else {
        anyhow::anyhow!("job panicked")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::panic::AssertUnwindSafe;

    #[tokio::test]
    async fn extracts_str_panic_messages() {
        let payload = AssertUnwindSafe(async { panic!("boom") })
            .catch_unwind()
            .await
            .unwrap_err();
        let error = try_to_extract_panic_info(&*payload);
        assert_eq!(error.to_string(), "job panicked: boom");
    }

    #[tokio::test]
    async fn extracts_formatted_panic_messages() {
        let payload = AssertUnwindSafe(async { panic!("boom {}", 42) })
            .catch_unwind()
            .await
            .unwrap_err();
        let error = try_to_extract_panic_info(&*payload);
        assert_eq!(error.to_string(), "job panicked: boom 42");
    }
}
