// self
use crate::{
	_prelude::*,
	obs::{self, ClassifyOutcome, Operation},
};

/// Future wrapped in the operation span when tracing is enabled, the bare future otherwise.
#[cfg(feature = "tracing")]
pub type InstrumentedOperation<F> = tracing::instrument::Instrumented<F>;
/// Future wrapped in the operation span when tracing is enabled, the bare future otherwise.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedOperation<F> = F;

/// `iam_secret_broker.operation` span of one broker call.
///
/// The `outcome` field stays empty until [`finish`](Self::finish) is called.
#[derive(Clone, Debug)]
pub struct OperationSpan {
	operation: Operation,
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl OperationSpan {
	/// Opens a span for `operation` at the named call site.
	pub fn new(operation: Operation, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		let span = tracing::info_span!(
			"iam_secret_broker.operation",
			operation = operation.as_str(),
			stage,
			outcome = tracing::field::Empty,
		);
		#[cfg(not(feature = "tracing"))]
		let _ = stage;

		Self {
			operation,
			#[cfg(feature = "tracing")]
			span,
		}
	}

	/// Runs `fut` inside the span; no guard is held across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedOperation<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			tracing::Instrument::instrument(fut, self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}

	/// Records the outcome of `result` on the span and in the operation counter.
	pub fn finish<T, E>(&self, result: &Result<T, E>)
	where
		E: ClassifyOutcome,
	{
		#[cfg(feature = "tracing")]
		self.span.record("outcome", obs::outcome_of(result).as_str());

		obs::record_result(self.operation, result);
	}
}
