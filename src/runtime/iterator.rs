use crate::language::{ast::IteratorLiteral, types::IntegerKind};
use crate::runtime::{
    continuation::ContextId, environment::Environment, value::ArrayRef, value::Value,
};
use std::cell::RefCell;
use std::rc::Rc;

pub type IteratorRef = Rc<RefCell<IteratorState>>;

pub struct GeneratorState {
    pub body: Rc<IteratorLiteral>,
    pub env: Environment,
    pub context: ContextId,
    pub index: usize,
    pub result: Value,
}

pub enum IteratorSource {
    Generator(GeneratorState),
    Array {
        items: ArrayRef,
        index: usize,
    },
    Range {
        next: i128,
        end: i128,
        inclusive: bool,
        kind: IntegerKind,
    },
    /// A user value exposing `next()` and optionally `close()`.
    Adapter(Value),
}

pub struct IteratorState {
    pub source: IteratorSource,
    /// The generator body is currently running.
    pub busy: bool,
    pub done: bool,
    pub closed: bool,
}

impl IteratorState {
    pub fn new(source: IteratorSource) -> IteratorRef {
        Rc::new(RefCell::new(IteratorState {
            source,
            busy: false,
            done: false,
            closed: false,
        }))
    }

    pub fn finished(&self) -> bool {
        self.done || self.closed
    }

    /// Advances a cursor-backed iterator. Generators and adapters return `None`
    /// because they need the evaluator.
    pub fn step_cursor(&mut self) -> Option<Value> {
        let already_done = self.done;
        let mut exhausted = false;
        let next = match &mut self.source {
            IteratorSource::Array { items, index } => {
                let item = items.borrow().get(*index).cloned();
                if item.is_some() {
                    *index += 1;
                }
                Some(item.unwrap_or(Value::IteratorEnd))
            }
            IteratorSource::Range {
                next,
                end,
                inclusive,
                kind,
            } => {
                let in_range = if *inclusive { *next <= *end } else { *next < *end };
                if in_range && !already_done {
                    let value = Value::Integer {
                        value: *next,
                        kind: *kind,
                    };
                    match next.checked_add(1) {
                        Some(following) => *next = following,
                        None => exhausted = true,
                    }
                    Some(value)
                } else {
                    Some(Value::IteratorEnd)
                }
            }
            IteratorSource::Generator(_) | IteratorSource::Adapter(_) => None,
        };
        if exhausted || matches!(next, Some(Value::IteratorEnd)) {
            self.done = true;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_cursor_respects_inclusivity() {
        let iter = IteratorState::new(IteratorSource::Range {
            next: 1,
            end: 3,
            inclusive: true,
            kind: IntegerKind::I32,
        });
        let mut seen = Vec::new();
        loop {
            let value = iter.borrow_mut().step_cursor().unwrap();
            if matches!(value, Value::IteratorEnd) {
                break;
            }
            seen.push(value.as_integer().unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(iter.borrow().finished());
    }

    #[test]
    fn range_ending_at_the_integer_limit_stops_after_the_last_value() {
        let iter = IteratorState::new(IteratorSource::Range {
            next: i128::MAX - 1,
            end: i128::MAX,
            inclusive: true,
            kind: IntegerKind::I128,
        });
        let mut seen = Vec::new();
        loop {
            let value = iter.borrow_mut().step_cursor().unwrap();
            if matches!(value, Value::IteratorEnd) {
                break;
            }
            seen.push(value.as_integer().unwrap());
        }
        assert_eq!(seen, vec![i128::MAX - 1, i128::MAX]);
        assert!(iter.borrow().finished());
    }

    #[test]
    fn array_cursor_sees_appended_items() {
        let items = Rc::new(RefCell::new(vec![Value::int(1)]));
        let iter = IteratorState::new(IteratorSource::Array {
            items: items.clone(),
            index: 0,
        });
        assert!(iter.borrow_mut().step_cursor().unwrap().equals(&Value::int(1)));
        items.borrow_mut().push(Value::int(2));
        assert!(iter.borrow_mut().step_cursor().unwrap().equals(&Value::int(2)));
        assert!(matches!(
            iter.borrow_mut().step_cursor(),
            Some(Value::IteratorEnd)
        ));
    }
}
