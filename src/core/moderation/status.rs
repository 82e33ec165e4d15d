// Status aggregation - merges many verdicts into one.
//
// Used twice: item verdicts -> stage verdict, and route verdicts -> final
// disposition once a message has visited every stage of its route.

use super::moderation_models::{Disposition, Verdict};

/// Merge verdicts by fixed priority: Failed > Need_Manual > Pass > Pending.
///
/// An empty collection is `Pending`; any non-empty collection without
/// Failed or Need_Manual is `Pass`.
pub fn aggregate_verdicts<I>(verdicts: I) -> Verdict
where
    I: IntoIterator<Item = Verdict>,
{
    let mut seen_any = false;
    let mut need_manual = false;

    for verdict in verdicts {
        seen_any = true;
        match verdict {
            Verdict::Failed => return Verdict::Failed,
            Verdict::NeedManual => need_manual = true,
            Verdict::Pass | Verdict::Pending => {}
        }
    }

    if need_manual {
        Verdict::NeedManual
    } else if seen_any {
        Verdict::Pass
    } else {
        Verdict::Pending
    }
}

/// Compute a message's final disposition from its route verdicts.
///
/// Rejected if any stage failed, Accepted if every stage passed,
/// Manual_Pending otherwise. A stage still `Pending` at this point is an
/// anomaly: it is logged and routes the message to manual review.
pub fn final_disposition(message_id: &str, route_verdicts: &[Verdict]) -> Disposition {
    if route_verdicts.contains(&Verdict::Failed) {
        return Disposition::Rejected;
    }

    if route_verdicts.contains(&Verdict::Pending) {
        tracing::warn!(
            message_id,
            "Stage verdict still Pending at end of auto-moderation, sending to manual review"
        );
        return Disposition::ManualPending;
    }

    if route_verdicts.contains(&Verdict::NeedManual) {
        return Disposition::ManualPending;
    }

    Disposition::Accepted
}
