/// Macro to simplify writing a handler closure for [`JobKeeper::register_handler`].
///
/// Takes the name to bind the [`JobView`] to, an optional synchronous setup block and
/// a mandatory async logic block. The logic block must evaluate to
/// `Result<R, HandlerError>`; `?` converts any `std::error::Error + Send + Sync` error.
///
/// [`JobKeeper::register_handler`]: crate::JobKeeper::register_handler
/// [`JobView`]: crate::JobView
///
/// # Usage
///
/// ```
/// use jobkeeper::{handler_fn, JobKeeper};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// # fn register() -> Result<(), Box<dyn std::error::Error>> {
/// let keeper: JobKeeper<String, usize> = JobKeeper::builder().concurrency(2).build()?;
/// let sent = Arc::new(AtomicUsize::new(0));
///
/// // With setup block, run on every attempt before the future is created:
/// keeper.register_handler("send_email", handler_fn!(|job| {
///     let sent = sent.clone();
/// } {
///     let address: &str = job.payload.as_str();
///     if address.is_empty() {
///         return Err("missing address".into());
///     }
///     Ok(sent.fetch_add(1, Ordering::SeqCst) + 1)
/// }));
///
/// // Without setup block:
/// keeper.register_handler("noop", handler_fn!(|job| {
///     Ok(job.attempt as usize)
/// }));
/// # Ok(())
/// # }
/// ```
#[macro_export]
macro_rules! handler_fn {
    // Matcher 1: job binding, setup block `{...}`, then the main logic block `{...}`
    (
        |$job:ident| { $($setup_stmts:stmt);* $(;)? } // Setup block (optional contents)
        $main_block:block                             // Main logic block
    ) => {
        move |$job: $crate::JobView<_>| {
            $($setup_stmts;)*

            let fut = async move {
                let result: ::std::result::Result<_, $crate::HandlerError> = $main_block;
                result
            };

            Box::pin(fut) as $crate::HandlerFuture<_>
        }
    };

    // Matcher 2: job binding and the main logic block only
    (
        |$job:ident| $main_block:block
    ) => {
        move |$job: $crate::JobView<_>| {
            let fut = async move {
                let result: ::std::result::Result<_, $crate::HandlerError> = $main_block;
                result
            };

            Box::pin(fut) as $crate::HandlerFuture<_>
        }
    };
}
