use super::{errors::raised, impl_resolution::unify_types, Interpreter};
use crate::language::{
    ast::{
        AssignOp, AssignTarget, Assignment, BinaryOp, Expr, Interpolation, InterpolationPart,
        Literal, MapEntry, Pattern, PipeExpr, PipeForm, StructKind, StructLiteral, UnaryOp,
    },
    types::{FloatKind, IntegerKind, TypeExpr},
};
use crate::runtime::{
    continuation::{CallState, InterpolationState, NodeState, PipeState},
    environment::Environment,
    error::{RuntimeError, RuntimeResult},
    iterator::{IteratorSource, IteratorState},
    outcome::{complete, Flow},
    value::{StructInstance, Value},
};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

/// Binding that holds the subject inside a pipe stage.
pub(super) const TOPIC: &str = "%";

pub(super) fn placeholder_binding(index: usize) -> String {
    format!("@{index}")
}

impl Interpreter {
    pub(super) fn literal_value(&self, literal: &Literal) -> Value {
        match literal {
            Literal::Nil => Value::Nil,
            Literal::Bool(value) => Value::Bool(*value),
            Literal::Int(value, Some(kind)) => Value::Integer {
                value: *value,
                kind: *kind,
            },
            Literal::Int(value, None) => {
                let kind = [IntegerKind::I32, IntegerKind::I64]
                    .into_iter()
                    .find(|kind| {
                        let (low, high) = kind.bounds();
                        *value >= low && *value <= high
                    })
                    .unwrap_or(IntegerKind::I128);
                Value::Integer { value: *value, kind }
            }
            Literal::Float(value, kind) => Value::Float {
                value: *value,
                kind: kind.unwrap_or(FloatKind::F64),
            },
            Literal::Char(value) => Value::Char(*value),
            Literal::String(value) => Value::String(value.clone()),
        }
    }

    /// Text used by `print` and string interpolation. Structs with a
    /// `to_string` method render through it.
    pub(super) fn display_value(&mut self, value: &Value) -> RuntimeResult<String> {
        if let Value::Struct(_) = value {
            if self.has_method(value, "to_string") {
                let rendered = self.call_method(value, "to_string", Vec::new())?;
                return Ok(rendered.to_string());
            }
        }
        Ok(value.to_string())
    }

    pub(super) fn eval_interpolation(&mut self, node: &Interpolation, env: &Environment) -> RuntimeResult<Flow> {
        let (entry, resumed) = self.enter_node(&node.id);
        let mut state = match resumed {
            Some(NodeState::Interpolation(state)) => state,
            _ => InterpolationState {
                index: 0,
                rendered: String::new(),
            },
        };
        let outcome = self.run_interpolation(node, env, &mut state);
        self.leave_node(entry, Some(NodeState::Interpolation(state)), &outcome);
        outcome
    }

    fn run_interpolation(
        &mut self,
        node: &Interpolation,
        env: &Environment,
        state: &mut InterpolationState,
    ) -> RuntimeResult<Flow> {
        while let Some(part) = node.parts.get(state.index) {
            match part {
                InterpolationPart::Text(text) => state.rendered.push_str(text),
                InterpolationPart::Expr(expr) => {
                    let value = complete!(self.eval_expr(expr, env));
                    let text = self.display_value(&value)?;
                    state.rendered.push_str(&text);
                }
            }
            state.index += 1;
        }
        Ok(Flow::Completed(Value::String(state.rendered.clone())))
    }

    pub(super) fn eval_array(&mut self, items: &[Expr], env: &Environment) -> RuntimeResult<Flow> {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            values.push(complete!(self.eval_expr(item, env)));
        }
        Ok(Flow::Completed(Value::array(values)))
    }

    pub(super) fn eval_unary(&mut self, op: UnaryOp, operand: &Expr, env: &Environment) -> RuntimeResult<Flow> {
        let value = complete!(self.eval_expr(operand, env));
        let hook = match op {
            UnaryOp::Neg => Some(("Neg", "neg")),
            UnaryOp::BitNot => Some(("Not", "not")),
            UnaryOp::Not => None,
        };
        if let Some((interface, name)) = hook.filter(|_| !is_primitive(&value)) {
            if let Some(method) = self.interface_method(&value, interface, name) {
                return Ok(Flow::Completed(self.call_value(&method, Vec::new())?));
            }
        }
        let result = match (op, value) {
            (UnaryOp::Not, value) => Value::Bool(!value.truthy()),
            (UnaryOp::BitNot, Value::Integer { value, kind }) => {
                let flipped = if kind.is_signed() { !value } else { kind.bounds().1 - value };
                Value::Integer { value: flipped, kind }
            }
            (UnaryOp::BitNot, other) => {
                return Err(RuntimeError::type_mismatch(format!(
                    "bitwise not requires an integer, found `{}`",
                    other.type_name()
                )))
            }
            (UnaryOp::Neg, Value::Integer { value, kind }) => {
                let (low, high) = kind.bounds();
                match value.checked_neg() {
                    Some(negated) if negated >= low && negated <= high => Value::Integer {
                        value: negated,
                        kind,
                    },
                    _ => return Err(raised(format!("integer overflow negating {value} as {}", kind.name()))),
                }
            }
            (UnaryOp::Neg, Value::Float { value, kind }) => Value::Float { value: -value, kind },
            (UnaryOp::Neg, other) => {
                return Err(RuntimeError::type_mismatch(format!(
                    "cannot negate `{}`",
                    other.type_name()
                )))
            }
        };
        Ok(Flow::Completed(result))
    }

    pub(super) fn eval_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        env: &Environment,
    ) -> RuntimeResult<Flow> {
        let lhs = complete!(self.eval_expr(left, env));
        match op {
            BinaryOp::And if !lhs.truthy() => return Ok(Flow::Completed(Value::Bool(false))),
            BinaryOp::Or if lhs.truthy() => return Ok(Flow::Completed(Value::Bool(true))),
            BinaryOp::And | BinaryOp::Or => {
                let rhs = complete!(self.eval_expr(right, env));
                return Ok(Flow::Completed(Value::Bool(rhs.truthy())));
            }
            _ => {}
        }
        let rhs = complete!(self.eval_expr(right, env));
        Ok(Flow::Completed(self.apply_binary(op, &lhs, &rhs)?))
    }

    /// Binary operators on evaluated operands. Non-primitive left operands
    /// first look for an operator interface impl (`Add`, `Eq`, `Ord`, ...).
    pub(super) fn apply_binary(&mut self, op: BinaryOp, lhs: &Value, rhs: &Value) -> RuntimeResult<Value> {
        if !is_primitive(lhs) {
            if let Some(result) = self.dispatch_operator(op, lhs, rhs)? {
                return Ok(result);
            }
        }
        if op == BinaryOp::DivMod {
            return self.div_mod(lhs, rhs);
        }
        binary_values(op, lhs, rhs)
    }

    fn dispatch_operator(&mut self, op: BinaryOp, lhs: &Value, rhs: &Value) -> RuntimeResult<Option<Value>> {
        let arithmetic = match op {
            BinaryOp::Add => Some(("Add", "add")),
            BinaryOp::Sub => Some(("Sub", "sub")),
            BinaryOp::Mul => Some(("Mul", "mul")),
            BinaryOp::Div => Some(("Div", "div")),
            BinaryOp::Rem => Some(("Rem", "rem")),
            _ => None,
        };
        if let Some((interface, name)) = arithmetic {
            return match self.interface_method(lhs, interface, name) {
                Some(method) => Ok(Some(self.call_value(&method, vec![rhs.clone()])?)),
                None => Ok(None),
            };
        }
        match op {
            BinaryOp::Eq | BinaryOp::NotEq => {
                for interface in ["Eq", "PartialEq"] {
                    let method = match self.interface_method(lhs, interface, "eq") {
                        Some(method) => method,
                        None => continue,
                    };
                    return match self.call_value(&method, vec![rhs.clone()])? {
                        Value::Bool(equal) => Ok(Some(Value::Bool(equal == (op == BinaryOp::Eq)))),
                        other => Err(RuntimeError::type_mismatch(format!(
                            "{interface}.eq must return bool, found `{}`",
                            other.type_name()
                        ))),
                    };
                }
                Ok(None)
            }
            BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
                for (interface, name) in [("Ord", "cmp"), ("PartialOrd", "partial_cmp")] {
                    let method = match self.interface_method(lhs, interface, name) {
                        Some(method) => method,
                        None => continue,
                    };
                    let result = self.call_value(&method, vec![rhs.clone()])?;
                    let ordering = ordering_of(&result).ok_or_else(|| {
                        RuntimeError::type_mismatch(format!(
                            "{interface}.{name} must return an Ordering, found `{}`",
                            result.type_name()
                        ))
                    })?;
                    return Ok(Some(Value::Bool(ordering_satisfies(op, ordering))));
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// `a /% b`: Euclidean quotient and remainder as a `DivMod T`.
    fn div_mod(&self, lhs: &Value, rhs: &Value) -> RuntimeResult<Value> {
        let (a, b, kind) = match (lhs, rhs) {
            (Value::Integer { value: a, kind: ak }, Value::Integer { value: b, kind: bk }) => (*a, *b, ak.widen(*bk)),
            _ => return Err(operand_mismatch(BinaryOp::DivMod, lhs, rhs)),
        };
        let quotient = integer_arithmetic(BinaryOp::FloorDiv, a, b, kind)?;
        let remainder = euclid_remainder(a, b, kind)?;
        Ok(Value::Struct(StructInstance::new(
            self.prelude.div_mod.clone(),
            vec![quotient, remainder],
            vec![TypeExpr::named(kind.name())],
        )))
    }

    pub(super) fn eval_pipe(&mut self, node: &PipeExpr, env: &Environment) -> RuntimeResult<Flow> {
        let (entry, resumed) = self.enter_node(&node.id);
        let mut state = match resumed {
            Some(NodeState::Pipe(state)) => Some(state),
            _ => None,
        };
        let outcome = self.run_pipe(node, env, &mut state);
        self.leave_node(entry, state.map(NodeState::Pipe), &outcome);
        outcome
    }

    fn run_pipe(&mut self, node: &PipeExpr, env: &Environment, state: &mut Option<PipeState>) -> RuntimeResult<Flow> {
        if state.is_none() {
            let subject = complete!(self.eval_expr(&node.subject, env));
            let scope = env.child();
            scope.define(TOPIC, subject.clone());
            *state = Some(PipeState {
                subject,
                scope,
                call: None,
            });
        }
        let state = match state.as_mut() {
            Some(state) => state,
            None => return Ok(Flow::nil()),
        };
        if state.call.is_none() {
            match (node.form.get(), &node.stage) {
                (PipeForm::Topic, stage) => return self.eval_expr(stage, &state.scope),
                (PipeForm::Placeholder(arity), stage) => {
                    if arity != 1 {
                        return Err(RuntimeError::ArityMismatch {
                            name: "<placeholder>".into(),
                            expected: arity,
                            received: 1,
                        });
                    }
                    state.scope.define(&placeholder_binding(1), state.subject.clone());
                    return self.eval_expr(stage, &state.scope);
                }
                (PipeForm::Call, Expr::Call(call)) => {
                    let callee = complete!(self.eval_expr(&call.callee, &state.scope));
                    let args = subject_args(&callee, &state.subject);
                    state.call = Some(CallState::Args { callee, args });
                }
                (_, stage) => {
                    let callee = complete!(self.eval_expr(stage, &state.scope));
                    let args = subject_args(&callee, &state.subject);
                    state.call = Some(CallState::Retry { callee, args });
                }
            }
        }
        match state.call.take() {
            Some(CallState::Args { callee, mut args }) => {
                let extra: &[Expr] = match &node.stage {
                    Expr::Call(call) => &call.args,
                    _ => &[],
                };
                let offset = usize::from(!matches!(callee, Value::BoundMethod(_)));
                while let Some(arg) = extra.get(args.len() - offset) {
                    match self.eval_expr(arg, &state.scope)? {
                        Flow::Completed(value) => args.push(value),
                        other => {
                            state.call = Some(CallState::Args { callee, args });
                            return Ok(other);
                        }
                    }
                }
                state.call = Some(CallState::Retry { callee, args });
            }
            other => state.call = other,
        }
        self.drive_call(&mut state.call)
    }

    pub(super) fn topic_value(&self, env: &Environment) -> RuntimeResult<Value> {
        env.get(TOPIC)
            .ok_or_else(|| RuntimeError::unsupported("`%` used outside of a pipe stage"))
    }

    pub(super) fn placeholder_value(&self, index: usize, env: &Environment) -> RuntimeResult<Value> {
        if index == 0 {
            return Err(RuntimeError::type_mismatch("placeholder index must be positive, found @0"));
        }
        env.get(&placeholder_binding(index)).ok_or_else(|| {
            RuntimeError::unsupported(format!("placeholder @{index} used outside of a placeholder lambda"))
        })
    }

    /// `#name` reads `name` from the innermost pipe subject, or from `self`.
    pub(super) fn eval_implicit_member(&mut self, name: &str, env: &Environment) -> RuntimeResult<Flow> {
        let receiver = env.get(TOPIC).or_else(|| env.get("self")).ok_or_else(|| {
            RuntimeError::unsupported(format!("implicit member `#{name}` used without a receiver"))
        })?;
        Ok(Flow::Completed(self.member_value(&receiver, name, env)?))
    }

    /// Later entries overwrite earlier ones with an equal key.
    pub(super) fn eval_map_literal(&mut self, entries: &[MapEntry], env: &Environment) -> RuntimeResult<Flow> {
        let mut map = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry {
                MapEntry::Pair { key, value } => {
                    let key = complete!(self.eval_expr(key, env));
                    let value = complete!(self.eval_expr(value, env));
                    map_insert(&mut map, key, value);
                }
                MapEntry::Spread(source) => match complete!(self.eval_expr(source, env)) {
                    Value::Map(other) => {
                        for (key, value) in other.borrow().iter() {
                            map_insert(&mut map, key.clone(), value.clone());
                        }
                    }
                    other => {
                        return Err(RuntimeError::type_mismatch(format!(
                            "cannot spread `{}` into a map literal",
                            other.type_name()
                        )))
                    }
                },
            }
        }
        Ok(Flow::Completed(Value::Map(Rc::new(RefCell::new(map)))))
    }

    pub(super) fn eval_range(
        &mut self,
        start: &Expr,
        end: &Expr,
        inclusive: bool,
        env: &Environment,
    ) -> RuntimeResult<Flow> {
        let start = complete!(self.eval_expr(start, env));
        let end = complete!(self.eval_expr(end, env));
        match (start, end) {
            (
                Value::Integer {
                    value: next,
                    kind: start_kind,
                },
                Value::Integer {
                    value: end,
                    kind: end_kind,
                },
            ) => Ok(Flow::Completed(Value::Iterator(IteratorState::new(
                IteratorSource::Range {
                    next,
                    end,
                    inclusive,
                    kind: start_kind.widen(end_kind),
                },
            )))),
            (start, end) => Err(RuntimeError::type_mismatch(format!(
                "range bounds must be integers, found `{}` and `{}`",
                start.type_name(),
                end.type_name()
            ))),
        }
    }

    pub(super) fn eval_index(&mut self, object: &Expr, index: &Expr, env: &Environment) -> RuntimeResult<Flow> {
        let object = complete!(self.eval_expr(object, env));
        let index = complete!(self.eval_expr(index, env));
        let value = match &object {
            Value::Array(items) => {
                let items = items.borrow();
                let position = array_position(&index, items.len())?;
                items[position].clone()
            }
            Value::String(text) => {
                let chars: Vec<char> = text.chars().collect();
                Value::Char(chars[array_position(&index, chars.len())?])
            }
            Value::Map(entries) => entries
                .borrow()
                .iter()
                .find(|(key, _)| key.equals(&index))
                .map(|(_, value)| value.clone())
                .unwrap_or(Value::Nil),
            other => {
                return Err(RuntimeError::type_mismatch(format!(
                    "`{}` cannot be indexed",
                    other.type_name()
                )))
            }
        };
        Ok(Flow::Completed(value))
    }

    pub(super) fn eval_assignment(&mut self, node: &Assignment, env: &Environment) -> RuntimeResult<Flow> {
        match &node.target {
            AssignTarget::Pattern(pattern) => {
                let value = complete!(self.eval_expr(&node.value, env));
                let value = match node.op {
                    AssignOp::Declare => {
                        self.assign_by_pattern(pattern, &value, env, true)?;
                        value
                    }
                    AssignOp::Assign => {
                        self.assign_by_pattern(pattern, &value, env, false)?;
                        value
                    }
                    AssignOp::Compound(op) => {
                        let name = match pattern {
                            Pattern::Identifier(name) => name,
                            _ => {
                                return Err(RuntimeError::unsupported(
                                    "compound assignment needs a plain name on the left",
                                ))
                            }
                        };
                        let current = env.lookup(name)?;
                        let updated = self.apply_binary(op, &current, &value)?;
                        env.assign(name, updated.clone())?;
                        updated
                    }
                };
                Ok(Flow::Completed(value))
            }
            AssignTarget::Member { object, member } => {
                let object = complete!(self.eval_expr(object, env));
                let value = complete!(self.eval_expr(&node.value, env));
                let instance = match &object {
                    Value::Struct(instance) => instance.clone(),
                    other => {
                        return Err(RuntimeError::type_mismatch(format!(
                            "cannot assign field `{member}` on `{}`",
                            other.type_name()
                        )))
                    }
                };
                let value = match node.op {
                    AssignOp::Compound(op) => {
                        let current = instance.get_field(member).ok_or_else(|| unknown_field(&instance.def.name, member))?;
                        self.apply_binary(op, &current, &value)?
                    }
                    _ => value,
                };
                if !instance.set_field(member, value.clone()) {
                    return Err(unknown_field(&instance.def.name, member));
                }
                Ok(Flow::Completed(value))
            }
            AssignTarget::Index { object, index } => {
                let object = complete!(self.eval_expr(object, env));
                let index = complete!(self.eval_expr(index, env));
                let value = complete!(self.eval_expr(&node.value, env));
                match &object {
                    Value::Array(items) => {
                        let current = {
                            let items = items.borrow();
                            let position = array_position(&index, items.len())?;
                            items[position].clone()
                        };
                        let value = match node.op {
                            AssignOp::Compound(op) => self.apply_binary(op, &current, &value)?,
                            _ => value,
                        };
                        let mut items = items.borrow_mut();
                        let position = array_position(&index, items.len())?;
                        items[position] = value.clone();
                        Ok(Flow::Completed(value))
                    }
                    Value::Map(entries) => {
                        map_insert(&mut entries.borrow_mut(), index, value.clone());
                        Ok(Flow::Completed(value))
                    }
                    other => Err(RuntimeError::type_mismatch(format!(
                        "`{}` does not support index assignment",
                        other.type_name()
                    ))),
                }
            }
        }
    }

    pub(super) fn eval_struct_literal(&mut self, node: &StructLiteral, env: &Environment) -> RuntimeResult<Flow> {
        let def = match env.lookup(&node.type_name)? {
            Value::StructDef(def) => def,
            other => {
                return Err(RuntimeError::type_mismatch(format!(
                    "`{}` is not a struct",
                    other.type_name()
                )))
            }
        };
        let mut sources = Vec::with_capacity(node.update_sources.len());
        for source in &node.update_sources {
            match complete!(self.eval_expr(source, env)) {
                Value::Struct(instance) if instance.def.name == def.name => sources.push(instance),
                other => {
                    return Err(RuntimeError::type_mismatch(format!(
                        "cannot update `{}` from `{}`",
                        def.name,
                        other.type_name()
                    )))
                }
            }
        }
        let mut slots: Vec<Option<Value>> = vec![None; def.fields.len()];
        for (position, init) in node.fields.iter().enumerate() {
            let value = complete!(self.eval_expr(&init.value, env));
            let index = match (&init.name, node.positional) {
                (Some(name), false) => def.field_index(name).ok_or_else(|| unknown_field(&def.name, name))?,
                _ => position,
            };
            match slots.get_mut(index) {
                Some(slot) => *slot = Some(value),
                None => {
                    return Err(RuntimeError::ArityMismatch {
                        name: def.name.clone(),
                        expected: def.fields.len(),
                        received: node.fields.len(),
                    })
                }
            }
        }
        for source in sources.iter().rev() {
            for (index, slot) in slots.iter_mut().enumerate() {
                if slot.is_none() {
                    *slot = source.get_index(index);
                }
            }
        }
        let mut fields = Vec::with_capacity(slots.len());
        for (field, slot) in def.fields.iter().zip(slots) {
            match slot {
                Some(value) => fields.push(value),
                None if def.kind == StructKind::Positional => {
                    return Err(RuntimeError::ArityMismatch {
                        name: def.name.clone(),
                        expected: def.fields.len(),
                        received: node.fields.len(),
                    })
                }
                None => {
                    return Err(RuntimeError::type_mismatch(format!(
                        "missing field `{}` in `{}` literal",
                        field.name.as_deref().unwrap_or("_"),
                        def.name
                    )))
                }
            }
        }
        let scope_types = env.type_bindings();
        let generics = def.generic_names();
        let type_args = if !node.type_args.is_empty() {
            node.type_args.iter().map(|ty| ty.substitute(&scope_types)).collect()
        } else if generics.is_empty() {
            Vec::new()
        } else {
            let mut bindings = HashMap::new();
            for (field, value) in def.fields.iter().zip(fields.iter()) {
                unify_types(&field.ty, &value.runtime_type(), &generics, &mut bindings);
            }
            generics
                .iter()
                .map(|name| bindings.get(name).cloned().unwrap_or(TypeExpr::Wildcard))
                .collect()
        };
        Ok(Flow::Completed(Value::Struct(StructInstance::new(def, fields, type_args))))
    }
}

fn unknown_field(type_name: &str, field: &str) -> RuntimeError {
    RuntimeError::UnknownSymbol {
        name: format!("{type_name}.{field}"),
    }
}

fn array_position(index: &Value, len: usize) -> RuntimeResult<usize> {
    let raw = index
        .as_integer()
        .ok_or_else(|| RuntimeError::type_mismatch(format!("index must be an integer, found `{}`", index.type_name())))?;
    if raw < 0 || raw >= len as i128 {
        return Err(raised(format!("index {raw} out of bounds for length {len}")));
    }
    Ok(raw as usize)
}

pub(super) fn map_insert(entries: &mut Vec<(Value, Value)>, key: Value, value: Value) {
    match entries.iter_mut().find(|(existing, _)| existing.equals(&key)) {
        Some((_, slot)) => *slot = value,
        None => entries.push((key, value)),
    }
}

/// Applies a non-short-circuit binary operator to two primitive operands.
/// `/%` needs the interpreter and is handled by `apply_binary`.
fn binary_values(op: BinaryOp, lhs: &Value, rhs: &Value) -> RuntimeResult<Value> {
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(lhs.equals(rhs))),
        BinaryOp::NotEq => return Ok(Value::Bool(!lhs.equals(rhs))),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let ordering = compare(lhs, rhs)?;
            return Ok(Value::Bool(ordering_satisfies(op, ordering)));
        }
        BinaryOp::And => return Ok(Value::Bool(lhs.truthy() && rhs.truthy())),
        BinaryOp::Or => return Ok(Value::Bool(lhs.truthy() || rhs.truthy())),
        _ => {}
    }
    match (lhs, rhs) {
        (
            Value::Integer { value: a, kind: ak },
            Value::Integer { value: b, kind: bk },
        ) => integer_arithmetic(op, *a, *b, ak.widen(*bk)),
        (Value::Float { .. }, _) | (_, Value::Float { .. }) => {
            let (a, b) = match (as_float(lhs), as_float(rhs)) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(operand_mismatch(op, lhs, rhs)),
            };
            let kind = match (lhs, rhs) {
                (Value::Float { kind: FloatKind::F32, .. }, Value::Float { kind: FloatKind::F32, .. }) => FloatKind::F32,
                _ => FloatKind::F64,
            };
            let value = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Rem => a % b,
                BinaryOp::Pow => a.powf(b),
                _ => return Err(operand_mismatch(op, lhs, rhs)),
            };
            Ok(Value::Float { value, kind })
        }
        (Value::String(a), Value::String(b)) if op == BinaryOp::Add => Ok(Value::String(format!("{a}{b}"))),
        (Value::String(a), Value::Char(b)) if op == BinaryOp::Add => Ok(Value::String(format!("{a}{b}"))),
        _ => Err(operand_mismatch(op, lhs, rhs)),
    }
}

fn integer_arithmetic(op: BinaryOp, a: i128, b: i128, kind: IntegerKind) -> RuntimeResult<Value> {
    if matches!(op, BinaryOp::Div | BinaryOp::Rem | BinaryOp::FloorDiv) && b == 0 {
        return Err(raised("division by zero"));
    }
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div => a.checked_div(b),
        BinaryOp::Rem => a.checked_rem(b),
        BinaryOp::FloorDiv => a.checked_div_euclid(b),
        BinaryOp::Pow => {
            if b < 0 {
                return Err(raised("negative integer exponent is not supported"));
            }
            u32::try_from(b).ok().and_then(|exponent| a.checked_pow(exponent))
        }
        BinaryOp::BitAnd => Some(a & b),
        BinaryOp::BitOr => Some(a | b),
        BinaryOp::BitXor => Some(a ^ b),
        BinaryOp::Shl | BinaryOp::Shr => {
            let amount = u32::try_from(b)
                .ok()
                .filter(|amount| *amount < kind.bits())
                .ok_or_else(|| raised(format!("shift amount {b} out of range for {}", kind.name())))?;
            match op {
                BinaryOp::Shl => a.checked_shl(amount).filter(|shifted| *shifted >> amount == a),
                _ => Some(a >> amount),
            }
        }
        _ => {
            return Err(RuntimeError::type_mismatch(format!(
                "operator {op:?} does not apply to integers"
            )))
        }
    };
    in_range(result, kind)
}

fn euclid_remainder(a: i128, b: i128, kind: IntegerKind) -> RuntimeResult<Value> {
    if b == 0 {
        return Err(raised("division by zero"));
    }
    in_range(a.checked_rem_euclid(b), kind)
}

fn in_range(result: Option<i128>, kind: IntegerKind) -> RuntimeResult<Value> {
    let (low, high) = kind.bounds();
    match result {
        Some(value) if value >= low && value <= high => Ok(Value::Integer { value, kind }),
        _ => Err(raised(format!("integer overflow in {} arithmetic", kind.name()))),
    }
}

/// Operands that never consult operator interfaces.
fn is_primitive(value: &Value) -> bool {
    matches!(
        value,
        Value::Integer { .. }
            | Value::Float { .. }
            | Value::String(_)
            | Value::Char(_)
            | Value::Bool(_)
            | Value::Nil
            | Value::Void
    )
}

/// Callable pipe stages take the subject first, unless already bound to it.
fn subject_args(callee: &Value, subject: &Value) -> Vec<Value> {
    match callee {
        Value::BoundMethod(_) => Vec::new(),
        _ => vec![subject.clone()],
    }
}

/// Reads a `Less`/`Equal`/`Greater` value returned by `cmp`.
fn ordering_of(value: &Value) -> Option<Ordering> {
    let name = match value {
        Value::Struct(instance) => instance.def.name.as_str(),
        Value::StructDef(def) => def.name.as_str(),
        _ => return None,
    };
    match name {
        "Less" => Some(Ordering::Less),
        "Equal" => Some(Ordering::Equal),
        "Greater" => Some(Ordering::Greater),
        _ => None,
    }
}

fn ordering_satisfies(op: BinaryOp, ordering: Ordering) -> bool {
    match op {
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::LtEq => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Float { value, .. } => Some(*value),
        Value::Integer { value, .. } => Some(*value as f64),
        _ => None,
    }
}

fn compare(lhs: &Value, rhs: &Value) -> RuntimeResult<Ordering> {
    let ordering = match (lhs, rhs) {
        (Value::Integer { value: a, .. }, Value::Integer { value: b, .. }) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
        _ => match (as_float(lhs), as_float(rhs)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    ordering.ok_or_else(|| {
        RuntimeError::type_mismatch(format!(
            "cannot compare `{}` with `{}`",
            lhs.type_name(),
            rhs.type_name()
        ))
    })
}

fn operand_mismatch(op: BinaryOp, lhs: &Value, rhs: &Value) -> RuntimeError {
    RuntimeError::type_mismatch(format!(
        "operator {op:?} does not apply to `{}` and `{}`",
        lhs.type_name(),
        rhs.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use crate::config::RuntimeConfig;
    use crate::language::ast::{BinaryOp, Statement};
    use crate::language::build::*;
    use crate::language::types::IntegerKind;
    use crate::runtime::{error::RuntimeError, value::Value, Interpreter};

    fn run(body: Vec<Statement>) -> Result<Value, RuntimeError> {
        Interpreter::new(RuntimeConfig::default()).load_module(&module(body))
    }

    #[test]
    fn integer_overflow_raises_an_error() {
        let err = run(vec![expr_stmt(add(int_typed(250, IntegerKind::U8), int_typed(10, IntegerKind::U8)))]).unwrap_err();
        match err {
            RuntimeError::Raise { value } => assert!(value.to_string().contains("overflow")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn division_by_zero_raises() {
        let err = run(vec![expr_stmt(binary(BinaryOp::Div, int(1), int(0)))]).unwrap_err();
        assert!(matches!(err, RuntimeError::Raise { .. }));
    }

    #[test]
    fn interpolation_renders_each_part() {
        let value = run(vec![
            let_("n", int(3)),
            expr_stmt(interpolate(vec![text("n = "), splice(ident("n")), text("!")])),
        ])
        .unwrap();
        assert!(value.equals(&Value::string("n = 3!")));
    }

    #[test]
    fn struct_update_copies_missing_fields() {
        let value = run(vec![
            struct_stmt(struct_def("Point", vec![("x", ty("i32")), ("y", ty("i32"))])),
            let_("a", struct_lit("Point", vec![("x", int(1)), ("y", int(2))])),
            let_("b", struct_update("Point", ident("a"), vec![("y", int(9))])),
            expr_stmt(add(member(ident("b"), "x"), member(ident("b"), "y"))),
        ])
        .unwrap();
        assert!(value.equals(&Value::int(10)));
    }

    #[test]
    fn missing_struct_fields_are_reported() {
        let err = run(vec![
            struct_stmt(struct_def("Point", vec![("x", ty("i32")), ("y", ty("i32"))])),
            expr_stmt(struct_lit("Point", vec![("x", int(1))])),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("missing field `y`"));
    }

    #[test]
    fn index_assignment_updates_shared_arrays() {
        let value = run(vec![
            let_("xs", array(vec![int(1), int(2)])),
            let_("alias", ident("xs")),
            expr_stmt(assign_index(ident("alias"), int(1), int(5))),
            expr_stmt(index(ident("xs"), int(1))),
        ])
        .unwrap();
        assert!(value.equals(&Value::int(5)));
    }

    #[test]
    fn short_circuit_skips_the_right_operand() {
        let value = run(vec![expr_stmt(binary(
            BinaryOp::Or,
            bool_lit(true),
            call_fn("missing", vec![]),
        ))])
        .unwrap();
        assert!(value.equals(&Value::Bool(true)));
    }
}
