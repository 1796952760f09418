// self
use crate::obs::{ClassifyOutcome, Operation, Outcome};

const OPERATION_TOTAL: &str = "iam_secret_broker_operation_total";

/// Increments the operation counter for `outcome` (when metrics are enabled).
pub fn record_outcome(operation: Operation, outcome: Outcome) {
	#[cfg(feature = "metrics")]
	metrics::counter!(
		OPERATION_TOTAL,
		"operation" => operation.as_str(),
		"outcome" => outcome.as_str()
	)
	.increment(1);

	#[cfg(not(feature = "metrics"))]
	let _ = (OPERATION_TOTAL, operation, outcome);
}

/// Counts a finished operation under the outcome its result maps to.
pub fn record_result<T, E>(operation: Operation, result: &Result<T, E>)
where
	E: ClassifyOutcome,
{
	record_outcome(operation, super::outcome_of(result));
}
