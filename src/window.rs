//! Event-time windowing.
//!
//! This module groups time-decorated values into bounded windows and fires
//! each window exactly once when the watermark passes its end.
//!
//! # Core Concepts
//!
//! - [`Window`]: a half-open range `[start, stop)` owning an accumulated
//!   state and the elements added to it.
//! - [`WindowManager`]: assigns timestamps to open windows and closes
//!   windows as the watermark advances.
//! - [`FixedWindowManager`]: fixed-size windows aligned to multiples of the
//!   slide. With `slide == size` the windows tumble; with `slide < size`
//!   they overlap and a timestamp belongs to several of them; with
//!   `slide > size` some timestamps fall in no window at all.
//! - [`WindowedNode`]: a node running one manager per key.
//!
//! # Lateness
//!
//! A value whose timestamp lies behind the watermark still opens its
//! windows by the usual alignment rule. Those windows are ordinary: they
//! close on the next watermark check that has passed their `stop`, which for
//! a late value is usually the same call.
//!
//! # Example
//!
//! ```rust
//! use slipstream::time::Timestamp;
//! use slipstream::window::{FixedWindowManager, WindowManager};
//!
//! let mut manager = FixedWindowManager::new(5, 1, ()).unwrap();
//! let mut starts = Vec::new();
//! manager
//!   .for_each_window(Timestamp::new(7), &mut |w| {
//!     starts.push(w.start().as_i64());
//!     Ok(())
//!   })
//!   .unwrap();
//! assert_eq!(starts, vec![3, 4, 5, 6, 7]);
//! ```

use crate::collector::Collector;
use crate::error::{NodeError, WindowError};
use crate::node::{Node, NodeMeta};
use crate::time::Timestamp;
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// A time range `[start, stop)` with its accumulated state and elements.
#[derive(Clone, Debug)]
pub struct Window<S> {
  start: Timestamp,
  stop: Timestamp,
  state: S,
  elements: Vec<Value>,
}

impl<S> Window<S> {
  /// Creates an empty window.
  pub fn new(start: Timestamp, stop: Timestamp, state: S) -> Self {
    Self {
      start,
      stop,
      state,
      elements: Vec::new(),
    }
  }

  /// Inclusive lower bound.
  pub fn start(&self) -> Timestamp {
    self.start
  }

  /// Exclusive upper bound.
  pub fn stop(&self) -> Timestamp {
    self.stop
  }

  /// Returns `true` if `ts` lies in `[start, stop)`.
  pub fn contains(&self, ts: Timestamp) -> bool {
    self.start <= ts && ts < self.stop
  }

  /// Appends a time-decorated element.
  ///
  /// # Panics
  ///
  /// Panics if the element has no time decoration or if its timestamp lies
  /// outside the window. Window managers only hand out windows covering the
  /// timestamp they were asked for, so this indicates a caller bug.
  pub fn add_element(&mut self, value: Value) {
    let Some(time) = value.time() else {
      panic!("element {value} added to window {} has no timestamp", self);
    };
    if !self.contains(time.timestamp) {
      panic!(
        "element with timestamp {} added to window {}",
        time.timestamp.as_i64(),
        self
      );
    }
    self.elements.push(value);
  }

  /// The elements added so far, in insertion order.
  pub fn elements(&self) -> &[Value] {
    &self.elements
  }

  /// Calls `f` on every element, stopping at the first error.
  pub fn range<E, F>(&self, f: F) -> Result<(), E>
  where
    F: FnMut(&Value) -> Result<(), E>,
  {
    self.elements.iter().try_for_each(f)
  }

  /// Returns `true` if no element has been added.
  pub fn is_empty(&self) -> bool {
    self.elements.is_empty()
  }

  /// The window state.
  pub fn state(&self) -> &S {
    &self.state
  }

  /// The window state, mutably.
  pub fn state_mut(&mut self) -> &mut S {
    &mut self.state
  }

  /// Consumes the window and returns its state.
  pub fn into_state(self) -> S {
    self.state
  }
}

impl<S> fmt::Display for Window<S> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{}, {})", self.start.as_i64(), self.stop.as_i64())
  }
}

/// Callback invoked on each open window covering a timestamp.
pub type OpenWindowFn<'a, S> = dyn FnMut(&mut Window<S>) -> Result<(), NodeError> + 'a;

/// Callback invoked on each window as it closes.
pub type ClosedWindowFn<'a, S> = dyn FnMut(Window<S>) -> Result<(), NodeError> + 'a;

/// Provides the open windows for a timestamp and closes windows as the
/// watermark advances.
pub trait WindowManager<S> {
  /// Calls `f` on every window covering `ts`, creating missing ones first.
  fn for_each_window(&mut self, ts: Timestamp, f: &mut OpenWindowFn<'_, S>) -> Result<(), NodeError>;

  /// Raises the recorded watermark to `wm` and calls `f` on every window
  /// whose `stop` is at or below it, removing it first.
  ///
  /// A `wm` lower than the recorded watermark does not lower it. A window is
  /// handed to `f` at most once.
  fn for_each_closed_window(&mut self, wm: Timestamp, f: &mut ClosedWindowFn<'_, S>) -> Result<(), NodeError>;
}

/// Fixed-size windows starting at multiples of the slide.
///
/// Windows never start before the epoch: timestamps below zero fall in no
/// window.
#[derive(Clone, Debug)]
pub struct FixedWindowManager<S> {
  size: i64,
  slide: i64,
  initial: S,
  windows: BTreeMap<Timestamp, Window<S>>,
  watermark: Timestamp,
}

impl<S: Clone> FixedWindowManager<S> {
  /// Creates a manager for windows of `size` every `slide`, each starting
  /// from a clone of `initial`.
  pub fn new(size: i64, slide: i64, initial: S) -> Result<Self, WindowError> {
    if size <= 0 || slide <= 0 {
      return Err(WindowError::InvalidConfig(format!(
        "size and slide must be greater than 0, got size {size} and slide {slide}"
      )));
    }
    Ok(Self {
      size,
      slide,
      initial,
      windows: BTreeMap::new(),
      watermark: Timestamp::MIN,
    })
  }

  /// Window size.
  pub fn size(&self) -> i64 {
    self.size
  }

  /// Distance between consecutive window starts.
  pub fn slide(&self) -> i64 {
    self.slide
  }

  /// The highest watermark seen so far.
  pub fn watermark(&self) -> Timestamp {
    self.watermark
  }

  /// Number of windows currently open.
  pub fn open_windows(&self) -> usize {
    self.windows.len()
  }

  /// Returns an empty manager with the same configuration.
  pub fn fresh(&self) -> Self {
    Self {
      size: self.size,
      slide: self.slide,
      initial: self.initial.clone(),
      windows: BTreeMap::new(),
      watermark: Timestamp::MIN,
    }
  }

  /// Aligned starts of every window covering `ts`, ascending.
  pub fn assign_windows(&self, ts: Timestamp) -> Vec<Timestamp> {
    let ts = ts.as_i64();
    if ts < 0 {
      return Vec::new();
    }
    // first aligned start whose window still reaches ts
    let reach = ts.saturating_sub(self.size);
    let mut start = (reach.div_euclid(self.slide) + 1)
      .saturating_mul(self.slide)
      .max(0);

    let mut starts = Vec::new();
    while start <= ts {
      starts.push(Timestamp::new(start));
      match start.checked_add(self.slide) {
        Some(next) => start = next,
        None => break,
      }
    }
    starts
  }
}

impl<S: Clone> WindowManager<S> for FixedWindowManager<S> {
  fn for_each_window(&mut self, ts: Timestamp, f: &mut OpenWindowFn<'_, S>) -> Result<(), NodeError> {
    for start in self.assign_windows(ts) {
      let (size, initial) = (self.size, &self.initial);
      self.windows.entry(start).or_insert_with(|| {
        trace!(start = start.as_i64(), size, "window opened");
        Window::new(start, Timestamp::new(start.as_i64().saturating_add(size)), initial.clone())
      });
    }
    let lowest = Timestamp::new(ts.as_i64().saturating_sub(self.size - 1));
    for window in self.windows.range_mut(lowest..=ts).map(|(_, w)| w) {
      if window.contains(ts) {
        f(window)?;
      }
    }
    Ok(())
  }

  fn for_each_closed_window(&mut self, wm: Timestamp, f: &mut ClosedWindowFn<'_, S>) -> Result<(), NodeError> {
    if wm > self.watermark {
      self.watermark = wm;
    }
    // stop <= watermark  <=>  start <= watermark - size
    let last_closed = self.watermark.as_i64().saturating_sub(self.size);
    let mut closed = match last_closed.checked_add(1) {
      Some(first_open) => {
        let open = self.windows.split_off(&Timestamp::new(first_open));
        std::mem::replace(&mut self.windows, open)
      }
      None => std::mem::take(&mut self.windows),
    };
    while let Some((_, window)) = closed.pop_first() {
      trace!(window = %window, watermark = self.watermark.as_i64(), "window closed");
      if let Err(e) = f(window) {
        self.windows.append(&mut closed);
        return Err(e);
      }
    }
    Ok(())
  }
}

type ElementFn<S> = dyn Fn(&mut Window<S>, &dyn Collector, &Value) -> Result<(), NodeError> + Send + Sync;
type EmitFn<S> = dyn Fn(Window<S>, &dyn Collector) -> Result<(), NodeError> + Send + Sync;

/// A node aggregating time-decorated values into fixed windows.
///
/// For every value, `on_element` runs on each open window covering its
/// timestamp, then `on_close` runs on each window the value's watermark
/// closes. Values must carry a time decoration.
pub struct WindowedNode<S> {
  meta: NodeMeta,
  manager: FixedWindowManager<S>,
  on_element: Arc<ElementFn<S>>,
  on_close: Arc<EmitFn<S>>,
}

impl<S> WindowedNode<S>
where
  S: Clone + Send + 'static,
{
  /// Creates a windowed node over windows of `size` every `slide`.
  pub fn new<A, E>(size: i64, slide: i64, initial: S, on_element: A, on_close: E) -> Result<Self, WindowError>
  where
    A: Fn(&mut Window<S>, &dyn Collector, &Value) -> Result<(), NodeError> + Send + Sync + 'static,
    E: Fn(Window<S>, &dyn Collector) -> Result<(), NodeError> + Send + Sync + 'static,
  {
    Ok(Self {
      meta: NodeMeta::new("window"),
      manager: FixedWindowManager::new(size, slide, initial)?,
      on_element: Arc::new(on_element),
      on_close: Arc::new(on_close),
    })
  }

  /// The window manager of this instance.
  pub fn manager(&self) -> &FixedWindowManager<S> {
    &self.manager
  }
}

impl<S> Node for WindowedNode<S>
where
  S: Clone + Send + 'static,
{
  fn process(&mut self, out: &dyn Collector, value: Value) -> Result<(), NodeError> {
    let time = value.require_time()?;
    let on_element = Arc::clone(&self.on_element);
    self
      .manager
      .for_each_window(time.timestamp, &mut |w| on_element(w, out, &value))?;
    let on_close = Arc::clone(&self.on_close);
    self
      .manager
      .for_each_closed_window(time.watermark, &mut |w| on_close(w, out))
  }

  fn clone_node(&self) -> Box<dyn Node> {
    Box::new(Self {
      meta: self.meta.clone(),
      manager: self.manager.fresh(),
      on_element: Arc::clone(&self.on_element),
      on_close: Arc::clone(&self.on_close),
    })
  }

  fn meta(&self) -> &NodeMeta {
    &self.meta
  }

  fn meta_mut(&mut self) -> &mut NodeMeta {
    &mut self.meta
  }
}
