use std::{mem::take, rc::Rc};

#[cfg(test)]
mod tests;

/// Detaches an observer when dropped.
#[derive(Default)]
#[must_use]
pub struct Subscription(RawSubscription);

impl Subscription {
    pub fn empty() -> Self {
        Subscription(RawSubscription::Empty)
    }
    pub fn from_fn(f: impl FnOnce() + 'static) -> Self {
        Subscription(RawSubscription::Fn(Box::new(f)))
    }
    pub fn from_rc_fn<T: 'static>(this: Rc<T>, unsubscribe: impl FnOnce(Rc<T>) + 'static) -> Self {
        Self::from_fn(move || unsubscribe(this))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.0, RawSubscription::Empty)
    }

    /// Detaches now instead of on drop.
    pub fn unsubscribe(mut self) {
        self.run();
    }

    fn run(&mut self) {
        match take(&mut self.0) {
            RawSubscription::Empty => {}
            RawSubscription::Fn(f) => f(),
        }
    }
}
impl Drop for Subscription {
    fn drop(&mut self) {
        self.run();
    }
}
impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            RawSubscription::Empty => f.write_str("Subscription(empty)"),
            RawSubscription::Fn(_) => f.write_str("Subscription(active)"),
        }
    }
}

#[derive(Default)]
enum RawSubscription {
    #[default]
    Empty,
    Fn(Box<dyn FnOnce() + 'static>),
}
