//! Functional updates.
//!
//! A client-atomic carries a list of funcalls applied in order to the
//! latest visible value to produce the next version. Numeric funcalls
//! detect overflow ("mathematical result not representable as int64")
//! before anything is written; a failing funcall aborts the whole
//! operation and no version is consumed.

use bytes::Bytes;

use crate::error::DataError;
#[cfg(test)]
use crate::schema::PrimType;
use crate::schema::{AttrType, Schema};
use crate::value::{PackedTuple, Value, cmp_values};

/// The kinds of functional update.
///
/// The numeric and string kinds double as *micro operations*: applied
/// with a `map_key`, they edit one entry of a map attribute instead of
/// a primitive attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FuncKind {
    /// Replace the attribute wholesale.
    Set,
    NumAdd,
    NumSub,
    NumMul,
    NumDiv,
    NumMod,
    NumAnd,
    NumOr,
    NumXor,
    StringPrepend,
    StringAppend,
    ListLpush,
    ListRpush,
    SetAdd,
    SetRemove,
    /// Keep only elements also present in the argument set.
    SetIntersect,
    /// Add every element of the argument set.
    SetUnion,
    MapAdd,
    MapRemove,
}

/// One functional update against one attribute.
///
/// `arg` is the operand; for `MapAdd` it is the new mapped value and
/// `map_key` selects the entry, while `MapRemove` uses `map_key` alone.
#[derive(Debug, Clone, PartialEq)]
pub struct Funcall {
    pub attr: u16,
    pub kind: FuncKind,
    pub arg: Value,
    pub map_key: Option<Value>,
}

impl Funcall {
    pub fn new(attr: u16, kind: FuncKind, arg: Value) -> Self {
        Self {
            attr,
            kind,
            arg,
            map_key: None,
        }
    }

    pub fn with_map_key(attr: u16, kind: FuncKind, map_key: Value, arg: Value) -> Self {
        Self {
            attr,
            kind,
            arg,
            map_key: Some(map_key),
        }
    }
}

/// Applies `funcs` to the previous value of `key`, producing the packed
/// tuple of the next version. `old` is the latest visible tuple, or
/// `None` when the key has no value (every attribute starts unset).
pub fn apply_funcs(
    schema: &Schema,
    funcs: &[Funcall],
    _key: &Bytes,
    old: Option<&PackedTuple>,
) -> Result<PackedTuple, DataError> {
    let mut values = match old {
        Some(tuple) => tuple.decode(schema)?,
        None => (0..schema.value_sz())
            .map(|i| Value::zero(schema.value_type(i).expect("iterating schema width")))
            .collect(),
    };

    for func in funcs {
        if func.attr == 0 {
            return Err(DataError::BadFunc {
                index: 0,
                ty: "key attributes are immutable",
            });
        }

        let ty = schema
            .attr(func.attr)
            .ok_or(DataError::UnknownAttribute {
                index: func.attr,
                count: schema.attrs_sz(),
            })?
            .ty;
        let slot = &mut values[usize::from(func.attr) - 1];
        apply_one(slot, ty, func)?;
    }

    PackedTuple::encode(schema, &values)
}

fn apply_one(slot: &mut Value, ty: AttrType, func: &Funcall) -> Result<(), DataError> {
    let index = func.attr;

    match func.kind {
        FuncKind::Set => {
            if !func.arg.fits(ty) {
                return Err(DataError::TypeMismatch {
                    index,
                    expected: ty.name(),
                    got: func.arg.type_name(),
                });
            }

            *slot = canonicalize(func.arg.clone(), ty);
            Ok(())
        }
        FuncKind::NumAdd
        | FuncKind::NumSub
        | FuncKind::NumMul
        | FuncKind::NumDiv
        | FuncKind::NumMod
        | FuncKind::NumAnd
        | FuncKind::NumOr
        | FuncKind::NumXor => match &func.map_key {
            Some(_) => apply_map_micro(slot, ty, func, apply_numeric),
            None => apply_numeric(slot, func),
        },
        FuncKind::StringPrepend | FuncKind::StringAppend => match &func.map_key {
            Some(_) => apply_map_micro(slot, ty, func, apply_string),
            None => apply_string(slot, func),
        },
        FuncKind::ListLpush | FuncKind::ListRpush => apply_list(slot, ty, func),
        FuncKind::SetAdd | FuncKind::SetRemove => apply_set(slot, ty, func),
        FuncKind::SetIntersect | FuncKind::SetUnion => apply_set_algebra(slot, ty, func),
        FuncKind::MapAdd | FuncKind::MapRemove => apply_map(slot, ty, func),
    }
}

/// Applies a numeric or string funcall to one entry of a map attribute.
/// A missing entry starts from the value type's zero, so
/// `map_atomic_add` on an absent counter behaves like an insert.
fn apply_map_micro(
    slot: &mut Value,
    ty: AttrType,
    func: &Funcall,
    inner: fn(&mut Value, &Funcall) -> Result<(), DataError>,
) -> Result<(), DataError> {
    let index = func.attr;
    let AttrType::Map(key_ty, val_ty) = ty else {
        return Err(DataError::BadFunc {
            index,
            ty: ty.name(),
        });
    };

    let map_key = func.map_key.as_ref().expect("dispatched with a map key");

    if !map_key.fits(AttrType::Primitive(key_ty)) {
        return Err(DataError::TypeMismatch {
            index,
            expected: key_ty.name(),
            got: map_key.type_name(),
        });
    }

    match &mut *slot {
        Value::Map(pairs) => {
            let pos = pairs.binary_search_by(|(k, _)| cmp_values(k, map_key));
            let i = match pos {
                Ok(i) => i,
                Err(i) => {
                    let zero = Value::zero(AttrType::Primitive(val_ty));
                    pairs.insert(i, (map_key.clone(), zero));
                    i
                }
            };
            inner(&mut pairs[i].1, func)
        }
        cur => Err(DataError::BadFunc {
            index,
            ty: cur.type_name(),
        }),
    }
}

fn apply_set_algebra(slot: &mut Value, ty: AttrType, func: &Funcall) -> Result<(), DataError> {
    let index = func.attr;
    let AttrType::Set(_) = ty else {
        return Err(DataError::BadFunc {
            index,
            ty: ty.name(),
        });
    };

    if !func.arg.fits(ty) {
        return Err(DataError::TypeMismatch {
            index,
            expected: ty.name(),
            got: func.arg.type_name(),
        });
    }

    match (&mut *slot, &func.arg) {
        (Value::Set(elems), Value::Set(arg)) => {
            match func.kind {
                FuncKind::SetIntersect => {
                    elems.retain(|e| arg.binary_search_by(|a| cmp_values(a, e)).is_ok());
                }
                FuncKind::SetUnion => {
                    for e in arg {
                        if let Err(pos) = elems.binary_search_by(|cur| cmp_values(cur, e)) {
                            elems.insert(pos, e.clone());
                        }
                    }
                }
                _ => unreachable!("dispatched set algebra"),
            }
            Ok(())
        }
        (cur, _) => Err(DataError::BadFunc {
            index,
            ty: cur.type_name(),
        }),
    }
}

fn apply_numeric(slot: &mut Value, func: &Funcall) -> Result<(), DataError> {
    let index = func.attr;

    match (&mut *slot, &func.arg) {
        (Value::Int(cur), Value::Int(arg)) => {
            let arg = *arg;
            let result = match func.kind {
                FuncKind::NumAdd => cur.checked_add(arg),
                FuncKind::NumSub => cur.checked_sub(arg),
                FuncKind::NumMul => cur.checked_mul(arg),
                FuncKind::NumDiv => cur.checked_div(arg),
                FuncKind::NumMod => cur.checked_rem(arg),
                FuncKind::NumAnd => Some(*cur & arg),
                FuncKind::NumOr => Some(*cur | arg),
                FuncKind::NumXor => Some(*cur ^ arg),
                _ => unreachable!("dispatched numeric"),
            };
            *cur = result.ok_or(DataError::Overflow { index })?;
            Ok(())
        }
        (Value::Float(cur), Value::Float(arg)) => {
            let arg = *arg;
            match func.kind {
                FuncKind::NumAdd => *cur += arg,
                FuncKind::NumSub => *cur -= arg,
                FuncKind::NumMul => *cur *= arg,
                FuncKind::NumDiv => *cur /= arg,
                FuncKind::NumMod | FuncKind::NumAnd | FuncKind::NumOr | FuncKind::NumXor => {
                    return Err(DataError::BadFunc {
                        index,
                        ty: "float64",
                    });
                }
                _ => unreachable!("dispatched numeric"),
            }
            Ok(())
        }
        (cur, _) => Err(DataError::BadFunc {
            index,
            ty: cur.type_name(),
        }),
    }
}

fn apply_string(slot: &mut Value, func: &Funcall) -> Result<(), DataError> {
    let index = func.attr;

    match (&mut *slot, &func.arg) {
        (Value::Str(cur), Value::Str(arg)) => {
            let mut joined = Vec::with_capacity(cur.len() + arg.len());

            if func.kind == FuncKind::StringPrepend {
                joined.extend_from_slice(arg);
                joined.extend_from_slice(cur);
            } else {
                joined.extend_from_slice(cur);
                joined.extend_from_slice(arg);
            }

            *cur = Bytes::from(joined);
            Ok(())
        }
        (cur, _) => Err(DataError::BadFunc {
            index,
            ty: cur.type_name(),
        }),
    }
}

fn apply_list(slot: &mut Value, ty: AttrType, func: &Funcall) -> Result<(), DataError> {
    let index = func.attr;
    let AttrType::List(elem_ty) = ty else {
        return Err(DataError::BadFunc {
            index,
            ty: ty.name(),
        });
    };

    if !func.arg.fits(AttrType::Primitive(elem_ty)) {
        return Err(DataError::TypeMismatch {
            index,
            expected: elem_ty.name(),
            got: func.arg.type_name(),
        });
    }

    match &mut *slot {
        Value::List(elems) => {
            if func.kind == FuncKind::ListLpush {
                elems.insert(0, func.arg.clone());
            } else {
                elems.push(func.arg.clone());
            }
            Ok(())
        }
        cur => Err(DataError::BadFunc {
            index,
            ty: cur.type_name(),
        }),
    }
}

fn apply_set(slot: &mut Value, ty: AttrType, func: &Funcall) -> Result<(), DataError> {
    let index = func.attr;
    let AttrType::Set(elem_ty) = ty else {
        return Err(DataError::BadFunc {
            index,
            ty: ty.name(),
        });
    };

    if !func.arg.fits(AttrType::Primitive(elem_ty)) {
        return Err(DataError::TypeMismatch {
            index,
            expected: elem_ty.name(),
            got: func.arg.type_name(),
        });
    }

    match &mut *slot {
        Value::Set(elems) => {
            match elems.binary_search_by(|e| cmp_values(e, &func.arg)) {
                Ok(pos) => {
                    if func.kind == FuncKind::SetRemove {
                        elems.remove(pos);
                    }
                }
                Err(pos) => {
                    if func.kind == FuncKind::SetAdd {
                        elems.insert(pos, func.arg.clone());
                    }
                }
            }
            Ok(())
        }
        cur => Err(DataError::BadFunc {
            index,
            ty: cur.type_name(),
        }),
    }
}

fn apply_map(slot: &mut Value, ty: AttrType, func: &Funcall) -> Result<(), DataError> {
    let index = func.attr;
    let AttrType::Map(key_ty, val_ty) = ty else {
        return Err(DataError::BadFunc {
            index,
            ty: ty.name(),
        });
    };

    let map_key = func.map_key.as_ref().ok_or(DataError::BadFunc {
        index,
        ty: "map funcall without a map key",
    })?;

    if !map_key.fits(AttrType::Primitive(key_ty)) {
        return Err(DataError::TypeMismatch {
            index,
            expected: key_ty.name(),
            got: map_key.type_name(),
        });
    }

    match &mut *slot {
        Value::Map(pairs) => {
            let pos = pairs.binary_search_by(|(k, _)| cmp_values(k, map_key));

            match func.kind {
                FuncKind::MapAdd => {
                    if !func.arg.fits(AttrType::Primitive(val_ty)) {
                        return Err(DataError::TypeMismatch {
                            index,
                            expected: val_ty.name(),
                            got: func.arg.type_name(),
                        });
                    }

                    match pos {
                        Ok(i) => pairs[i].1 = func.arg.clone(),
                        Err(i) => pairs.insert(i, (map_key.clone(), func.arg.clone())),
                    }
                }
                FuncKind::MapRemove => {
                    if let Ok(i) = pos {
                        pairs.remove(i);
                    }
                }
                _ => unreachable!("dispatched map"),
            }
            Ok(())
        }
        cur => Err(DataError::BadFunc {
            index,
            ty: cur.type_name(),
        }),
    }
}

fn canonicalize(value: Value, ty: AttrType) -> Value {
    match (value, ty) {
        (Value::Set(elems), AttrType::Set(_)) => Value::set(elems),
        (Value::Map(pairs), AttrType::Map(_, _)) => Value::map(pairs),
        (v, _) => v,
    }
}
