//! The retransmission timer: one per connection, doubling backoff,
//! bounded retries.

use super::Tcb;
use crate::{prelude::*, time::timer};

/// Base retransmission timeout, in ticks.
const RTO_TICKS: u64 = 50;
const MAX_RETRIES: u32 = 8;

/// Arm the timer if unacknowledged segments exist and it is not
/// already pending.
pub(super) fn arm(tcb: &Arc<Tcb>) {
    let mut retrans = tcb.retrans.lock();
    if retrans.queue.is_empty() || retrans.timer.is_some() {
        return;
    }
    let delay = RTO_TICKS * retrans.backoff as u64;
    let target = Arc::downgrade(tcb);
    retrans.timer = Some(timer::schedule_after(delay, move || {
        if let Some(tcb) = target.upgrade() {
            on_expire(&tcb);
        }
    }));
}

fn on_expire(tcb: &Arc<Tcb>) {
    let resend: Option<(u32, u8, Vec<u8>)> = {
        let mut retrans = tcb.retrans.lock();
        retrans.timer = None;
        if retrans.queue.is_empty() {
            return;
        }
        retrans.retries += 1;
        if retrans.retries > MAX_RETRIES {
            None
        } else {
            retrans.backoff = (retrans.backoff * 2).min(64);
            let head = &retrans.queue[0];
            Some((head.seq, head.flags, head.payload.clone()))
        }
    };
    match resend {
        Some((seq, flags, payload)) => {
            let _ = tcb.transmit(seq, flags, &payload);
            arm(tcb);
        }
        None => {
            warn!("tcp: retransmission limit reached, aborting connection");
            tcb.abort();
        }
    }
}
