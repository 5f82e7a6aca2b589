//! Field and method descriptors (`I`, `Ljava/lang/String;`, `(IJ)V`, ...).

use thiserror::Error;

use super::Kind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed descriptor {0:?}")]
pub struct DescriptorError(pub String);

/// Type of a field, parameter or return value. `boolean`, `byte`, `char` and `short`
/// are all represented as `Int`, as on the operand stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int,
    Long,
    Float,
    Double,
    /// Internal class name (`java/lang/String`) or array descriptor (`[I`).
    Ref(String),
}

impl FieldType {
    pub fn parse(desc: &str) -> Result<FieldType, DescriptorError> {
        match parse_one(desc, 0)? {
            (ty, end) if end == desc.len() => Ok(ty),
            _ => Err(DescriptorError(desc.to_string())),
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            FieldType::Int => Kind::Int,
            FieldType::Long => Kind::Long,
            FieldType::Float => Kind::Float,
            FieldType::Double => Kind::Double,
            FieldType::Ref(_) => Kind::Ref,
        }
    }

    pub fn width(&self) -> usize {
        self.kind().width()
    }

    /// Descriptor form of a reference type name (`java/lang/Object` -> `Ljava/lang/Object;`).
    pub fn ref_descriptor(type_name: &str) -> String {
        if type_name.starts_with('[') {
            type_name.to_string()
        } else {
            format!("L{};", type_name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDesc {
    pub params: Vec<FieldType>,
    /// `None` for `void`.
    pub ret: Option<FieldType>,
}

impl MethodDesc {
    pub fn parse(desc: &str) -> Result<MethodDesc, DescriptorError> {
        let err = || DescriptorError(desc.to_string());
        if !desc.starts_with('(') {
            return Err(err());
        }
        let mut params = Vec::new();
        let mut pos = 1;
        loop {
            match desc.as_bytes().get(pos) {
                Some(b')') => break,
                Some(_) => {
                    let (ty, next) = parse_one(desc, pos)?;
                    params.push(ty);
                    pos = next;
                }
                None => return Err(err()),
            }
        }
        let ret_desc = &desc[pos + 1..];
        let ret = if ret_desc == "V" {
            None
        } else {
            Some(FieldType::parse(ret_desc).map_err(|_| err())?)
        };
        Ok(MethodDesc { params, ret })
    }

    /// Local-variable slots taken by the parameters (receiver excluded).
    pub fn param_slots(&self) -> usize {
        self.params.iter().map(FieldType::width).sum()
    }
}

fn parse_one(desc: &str, start: usize) -> Result<(FieldType, usize), DescriptorError> {
    let err = || DescriptorError(desc.to_string());
    let bytes = desc.as_bytes();
    match bytes.get(start).ok_or_else(err)? {
        b'Z' | b'B' | b'C' | b'S' | b'I' => Ok((FieldType::Int, start + 1)),
        b'J' => Ok((FieldType::Long, start + 1)),
        b'F' => Ok((FieldType::Float, start + 1)),
        b'D' => Ok((FieldType::Double, start + 1)),
        b'L' => {
            let semi = desc[start..].find(';').ok_or_else(err)? + start;
            if semi == start + 1 {
                return Err(err());
            }
            Ok((FieldType::Ref(desc[start + 1..semi].to_string()), semi + 1))
        }
        b'[' => {
            let (_, end) = parse_one(desc, start + 1)?;
            Ok((FieldType::Ref(desc[start..end].to_string()), end))
        }
        _ => Err(err()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_types() {
        assert_eq!(FieldType::parse("Z").unwrap(), FieldType::Int);
        assert_eq!(FieldType::parse("J").unwrap(), FieldType::Long);
        assert_eq!(
            FieldType::parse("Ljava/lang/String;").unwrap(),
            FieldType::Ref("java/lang/String".into())
        );
        assert_eq!(
            FieldType::parse("[[Ljava/lang/Object;").unwrap(),
            FieldType::Ref("[[Ljava/lang/Object;".into())
        );
        assert!(FieldType::parse("Ljava/lang/String").is_err());
        assert!(FieldType::parse("II").is_err());
        assert!(FieldType::parse("L;").is_err());
    }

    #[test]
    fn test_method_desc() {
        let desc = MethodDesc::parse("(IJLjava/lang/String;[D)F").unwrap();
        assert_eq!(
            desc.params,
            vec![
                FieldType::Int,
                FieldType::Long,
                FieldType::Ref("java/lang/String".into()),
                FieldType::Ref("[D".into()),
            ]
        );
        assert_eq!(desc.ret, Some(FieldType::Float));
        assert_eq!(desc.param_slots(), 5);

        assert_eq!(MethodDesc::parse("()V").unwrap().ret, None);
        assert!(MethodDesc::parse("(I").is_err());
        assert!(MethodDesc::parse("I)V").is_err());
        assert!(MethodDesc::parse("()").is_err());
    }
}
