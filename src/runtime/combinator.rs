//! Combinators over eventuals used by the scenario drivers.

use crate::runtime::promise::{pair, Eventual, Promise};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Resolves once every input eventual has resolved.
///
/// An empty input resolves immediately.
pub fn when_all(eventuals: Vec<Eventual<()>>) -> Eventual<()> {
    let (promise, result) = pair::<()>();
    if eventuals.is_empty() {
        promise.set_value(());
        return result;
    }
    let remaining = Rc::new(Cell::new(eventuals.len()));
    let slot: Rc<RefCell<Option<Promise<()>>>> = Rc::new(RefCell::new(Some(promise)));
    for eventual in eventuals {
        let remaining = remaining.clone();
        let slot = slot.clone();
        let _ = eventual.then(move |()| {
            remaining.set(remaining.get() - 1);
            if remaining.get() == 0 {
                let promise = slot.borrow_mut().take().expect("when_all resolved twice");
                promise.set_value(());
            }
            Eventual::ready(())
        });
    }
    result
}

/// Runs `f` over every item, resolving when all resulting eventuals have.
pub fn parallel_for_each<I, F>(items: I, f: F) -> Eventual<()>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Eventual<()>,
{
    when_all(items.into_iter().map(f).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{sleep, Shard};
    use std::time::Duration;

    #[test]
    fn empty_when_all_is_ready() {
        Shard::run(|| {
            let all = when_all(Vec::new());
            assert!(all.is_ready());
            all
        });
    }

    #[test]
    fn when_all_waits_for_every_input() {
        let count = Shard::run(|| {
            let counter = Rc::new(Cell::new(0));
            let eventuals = (0..5)
                .map(|i| {
                    let counter = counter.clone();
                    sleep(Duration::from_millis(i)).map(move |()| {
                        counter.set(counter.get() + 1);
                    })
                })
                .collect();
            when_all(eventuals).map(move |()| counter.get())
        });
        assert_eq!(count, 5);
    }

    #[test]
    fn parallel_for_each_visits_all_items() {
        let sum = Shard::run(|| {
            let total = Rc::new(Cell::new(0u64));
            let t = total.clone();
            parallel_for_each(1..=4u64, move |n| {
                let t = t.clone();
                sleep(Duration::from_millis(1)).map(move |()| {
                    t.set(t.get() + n);
                })
            })
            .map(move |()| total.get())
        });
        assert_eq!(sum, 10);
    }
}
