//! Prints a program back in `.jasm` syntax.

use std::fmt::Write;

use crate::bytecode::{Class, Method, MethodId, Program, OBJECT};
use crate::specs::SpecTable;

/// Render `program` with the declarations `specs` attaches to its methods.
///
/// Labels print as `L<n>`; assembling the output yields the same program up to label
/// numbering.
pub fn disassemble(program: &Program, specs: &SpecTable) -> String {
    let mut out = String::new();
    for (i, class) in program.classes.values().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        write_class(&mut out, class, specs);
    }
    out
}

fn write_class(out: &mut String, class: &Class, specs: &SpecTable) {
    let _ = write!(out, "class {}", class.name);
    if let Some(super_name) = &class.super_name {
        if super_name != OBJECT {
            let _ = write!(out, " extends {}", super_name);
        }
    }
    if !class.interfaces.is_empty() {
        let _ = write!(out, " implements {}", class.interfaces.join(" "));
    }
    out.push_str(" {\n");

    for field in &class.fields {
        let keyword = if field.is_static { " static" } else { "" };
        let _ = writeln!(out, "    field{} {} {}", keyword, field.name, field.desc);
    }
    for (i, method) in class.methods.iter().enumerate() {
        if i > 0 || !class.fields.is_empty() {
            out.push('\n');
        }
        write_method(out, &method.id(&class.name), method, specs);
    }
    out.push_str("}\n");
}

fn write_method(out: &mut String, id: &MethodId, method: &Method, specs: &SpecTable) {
    let keyword = if method.is_static { " static" } else { "" };
    let _ = writeln!(
        out,
        "    method{} {} {} locals {} {{",
        keyword, method.name, method.desc, method.max_locals
    );

    for decl in specs.methods.iter().filter(|d| d.applies_to(id)) {
        match decl.entry {
            Some(true) => out.push_str("        .entry\n"),
            Some(false) => out.push_str("        .entry false\n"),
            None => {}
        }
        for spec in &decl.restore_points {
            let _ = write!(out, "        .await {}", spec.name);
            if !spec.owner.is_empty() {
                let _ = write!(out, " owner={}", spec.owner);
            }
            if !spec.desc.is_empty() {
                let _ = write!(out, " desc={}", spec.desc);
            }
            if !spec.patchable {
                out.push_str(" unpatchable");
            }
            out.push('\n');
        }
    }
    for tc in &method.try_catches {
        let _ = writeln!(
            out,
            "        .catch {} from {} to {} using {}",
            tc.catch_type.as_deref().unwrap_or("any"),
            tc.start,
            tc.end,
            tc.handler
        );
    }
    for var in &method.local_vars {
        let _ = writeln!(
            out,
            "        .var {} {} {} from {} to {}",
            var.slot, var.name, var.desc, var.start, var.end
        );
    }

    for insn in &method.code {
        let indent = if insn.is_pseudo() { "      " } else { "        " };
        let _ = writeln!(out, "{}{}", indent, insn);
    }
    out.push_str("    }\n");
}
