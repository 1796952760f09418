//! Per-request cancellation and deadlines applied at every suspension point.

// crates.io
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
// self
use crate::_prelude::*;

/// Caller-supplied cancellation signal plus an optional absolute deadline.
///
/// Cloning shares the cancellation token, so cancelling any clone cancels them all.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
	cancellation: CancellationToken,
	deadline: Option<Instant>,
}
impl RequestContext {
	/// Creates a context with no deadline that is cancelled only explicitly.
	pub fn new() -> Self {
		Self::default()
	}

	/// Uses the provided token as the cancellation signal.
	pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
		self.cancellation = token;

		self
	}

	/// Sets a deadline `timeout` from now; negative values expire immediately and a timeout
	/// beyond the timer's range leaves the context without a deadline.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		let timeout = if timeout.is_negative() { Duration::ZERO } else { timeout };

		self.deadline = Instant::now().checked_add(timeout.unsigned_abs());

		self
	}

	/// Token observed by this context.
	pub fn cancellation(&self) -> &CancellationToken {
		&self.cancellation
	}

	/// Cancels the context and every clone sharing its token.
	pub fn cancel(&self) {
		self.cancellation.cancel();
	}

	/// Returns `true` once the context has been cancelled.
	pub fn is_cancelled(&self) -> bool {
		self.cancellation.is_cancelled()
	}

	/// Drives `fut` until it completes, the context is cancelled, or the deadline elapses.
	///
	/// Cancellation wins over a simultaneously ready result so a cancelled caller never
	/// observes a value.
	pub async fn run<F, T>(&self, fut: F) -> Result<T>
	where
		F: Future<Output = Result<T>>,
	{
		let guarded = async {
			tokio::select! {
				biased;
				_ = self.cancellation.cancelled() => Err(Error::Cancelled),
				result = fut => result,
			}
		};

		match self.deadline {
			Some(deadline) =>
				time::timeout_at(deadline, guarded).await.unwrap_or(Err(Error::TimedOut)),
			None => guarded.await,
		}
	}
}
