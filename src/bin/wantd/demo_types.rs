//! Reference `WantBehavior` implementations bundled with the `wantd`
//! binary for smoke-testing manifests. Not part of the library surface —
//! the engine itself stays agnostic of any concrete want type.

use serde_json::Value;
use wantengine::want::{ProgressError, WantBehavior, WantContext};

/// Always achieved, touches nothing. Useful as a manifest placeholder.
pub struct Noop;

impl WantBehavior for Noop {
    fn initialize(&self, _ctx: &mut WantContext) -> Result<(), String> {
        Ok(())
    }
    fn progress(&self, _ctx: &mut WantContext) -> Result<(), ProgressError> {
        Ok(())
    }
    fn is_achieved(&self, _ctx: &WantContext) -> bool {
        true
    }
}

fn sieve(start: i64, end: i64) -> Vec<i64> {
    (start.max(2)..=end).filter(|&n| (2..n).all(|d| n % d != 0)).collect()
}

/// Publishes primes in `[params.start, params.end]` on its own topic, one
/// message per prime, then a terminal `done` marker (spec §8 scenario 1).
pub struct PrimeNumbers;

impl WantBehavior for PrimeNumbers {
    fn initialize(&self, _ctx: &mut WantContext) -> Result<(), String> {
        Ok(())
    }

    fn progress(&self, ctx: &mut WantContext) -> Result<(), ProgressError> {
        if ctx.want.get_state_bool("published").unwrap_or(false) {
            return Ok(());
        }
        let start = ctx.want.spec.params.get("start").and_then(Value::as_i64).unwrap_or(2);
        let end = ctx.want.spec.params.get("end").and_then(Value::as_i64).unwrap_or(start);
        let primes = sieve(start, end);

        let pubsub = ctx.pubsub.ok_or("prime numbers requires pubsub access")?;
        let topic = ctx.want.metadata.id.to_string();
        for prime in &primes {
            pubsub.publish(&topic, Value::from(*prime), false);
        }
        pubsub.publish(&topic, Value::Null, true);

        ctx.want.store_state("primes", serde_json::to_value(&primes).expect("vec<i64> serializes"));
        ctx.want.store_state("published", Value::Bool(true));
        Ok(())
    }

    fn is_achieved(&self, ctx: &WantContext) -> bool {
        ctx.want.get_state_bool("published").unwrap_or(false)
    }
}

/// Consumes every producer in `want.inputs`, accumulating distinct prime
/// values until it observes a `done` marker (spec §8 scenario 1).
pub struct PrimeSequence;

impl WantBehavior for PrimeSequence {
    fn initialize(&self, _ctx: &mut WantContext) -> Result<(), String> {
        Ok(())
    }

    fn progress(&self, ctx: &mut WantContext) -> Result<(), ProgressError> {
        let pubsub = ctx.pubsub.ok_or("prime sequence requires pubsub access")?;
        let consumer_id = ctx.want.metadata.id.to_string();
        let producers = ctx.want.inputs.clone();

        let mut found: Vec<i64> = ctx
            .want
            .get_state("foundPrimes")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let mut producer_done = ctx.want.get_state_bool("producer_done").unwrap_or(false);

        for producer in producers {
            let subscription = pubsub.subscribe(&producer.to_string(), &consumer_id);
            for message in subscription.poll() {
                if message.done {
                    producer_done = true;
                    continue;
                }
                if let Some(n) = message.payload.as_i64() {
                    found.push(n);
                }
            }
        }
        found.sort_unstable();
        found.dedup();

        ctx.want.store_state("foundPrimes", serde_json::to_value(&found).expect("vec<i64> serializes"));
        ctx.want.store_state("primeCount", Value::from(found.len() as i64));
        ctx.want.store_state("producer_done", Value::Bool(producer_done));
        Ok(())
    }

    fn is_achieved(&self, ctx: &WantContext) -> bool {
        ctx.want.get_state_bool("producer_done").unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sieve_matches_spec_example() {
        assert_eq!(sieve(1, 20), vec![2, 3, 5, 7, 11, 13, 17, 19]);
    }
}
