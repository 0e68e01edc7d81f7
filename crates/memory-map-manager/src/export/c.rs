//! C header and source generation.

use std::fmt::Write;

use serde_json::Value;
use tracing::debug;

use super::{Exporter, Files};
use crate::error::Result;
use crate::model::{Bitfield, Enumeration, MemoryMap, Typedef};
use crate::primitive::Primitive;
use crate::MMM_VERSION;

/// Width of the section title lines, closing slash excluded.
const TITLE_WIDTH: usize = 78;

/// Title of typedef sections, kept as existing firmware expects it.
const TYPEDEFS_TITLE: &str =
    "/* tyepdefs ***************************************************************/";

/// Values per line of an access table.
const ACCESS_PER_LINE: usize = 8;

/// A titled block of a generated file.
struct Section {
    title: String,
    body: String,
}

impl Section {
    fn new(name: &str, body: String) -> Self {
        let mut title = format!("/* {name} ");
        let stars = TITLE_WIDTH.saturating_sub(title.len());
        title.extend(std::iter::repeat('*').take(stars));
        title.push('/');
        Self { title, body }
    }

    fn typedefs(body: String) -> Self {
        Self {
            title: TYPEDEFS_TITLE.to_string(),
            body,
        }
    }
}

fn include_guard(fname: &str) -> String {
    fname.to_uppercase().replace('.', "_")
}

fn doc_suffix(description: Option<&str>) -> String {
    description.map_or_else(String::new, |d| format!(" /**< {d} */"))
}

fn includes<'s>(headers: impl IntoIterator<Item = &'s str>) -> String {
    headers
        .into_iter()
        .map(|h| format!("#include \"{h}\"\n"))
        .collect()
}

/// Literal suffix of an enum constant of the given type.
fn literal_suffix(ty: Primitive) -> &'static str {
    match ty {
        Primitive::U64 => "ULL",
        Primitive::I64 => "LL",
        _ => "",
    }
}

impl Exporter<'_> {
    /// Generate every C header and source.
    ///
    /// # Errors
    ///
    /// Returns an error if formatting fails.
    pub fn gen_c_files(&self) -> Result<Files> {
        let mut files = Files::new();
        self.gen_access_files(&mut files)?;
        self.gen_bitfields_h(&mut files)?;
        self.gen_default_files(&mut files)?;
        self.gen_defs_h(&mut files)?;
        self.gen_typedefs_h(&mut files)?;
        for (name, typedef) in &self.cfg.typedefs {
            self.gen_typedef_type_h(&mut files, name, typedef)?;
        }
        for map in &self.cfg.maps {
            self.gen_typedef_map_h(&mut files, map)?;
        }
        self.gen_cc_h(&mut files)?;
        self.gen_meta_h(&mut files)?;
        self.gen_enums_h(&mut files)?;
        debug!(count = files.len(), "Generated C files");
        Ok(files)
    }

    fn banner(&self, out: &mut String, fname: &str, group: &str) -> std::fmt::Result {
        let rule = "*".repeat(TITLE_WIDTH);
        writeln!(out, "/**")?;
        writeln!(out, " {rule}")?;
        writeln!(out, " * @addtogroup {group}_mmm")?;
        writeln!(out, " * @{{")?;
        writeln!(out, " * @file      {fname}")?;
        writeln!(out, " * @version   {}", self.cfg.metadata.version)?;
        if !self.hide_version {
            writeln!(out, " *")?;
            writeln!(
                out,
                " * @details   Generated from the memory map manager version {MMM_VERSION}"
            )?;
        }
        writeln!(out, " {rule}")?;
        writeln!(out, " */")
    }

    /// Assemble a file: banner, guard for headers, then the sections.
    fn render(&self, fname: &str, group: &str, sections: &[Section]) -> Result<String> {
        let header = fname.ends_with(".h");
        let guard = include_guard(fname);
        let mut out = String::new();
        self.banner(&mut out, fname, group)?;
        if header {
            write!(
                out,
                "#ifndef {guard}\n#define {guard}\n\n#ifdef __cplusplus\nextern \"C\"\n{{\n#endif\n"
            )?;
        }
        for section in sections {
            write!(out, "\n{}\n{}", section.title, section.body)?;
        }
        if header {
            write!(
                out,
                "\n#ifdef __cplusplus\n}}\n#endif\n\n#endif /* {guard} */\n"
            )?;
        } else {
            out.push('\n');
        }
        out.push_str("/** @} **/");
        Ok(out)
    }

    /// C text of a size: the define name when it came from one, the number
    /// otherwise.
    fn c_expr(&self, raw: Option<&Value>, resolved: impl ToString) -> String {
        match raw.and_then(Value::as_str).map(str::trim) {
            Some(name) if self.cfg.has_define(name) => name.to_string(),
            _ => resolved.to_string(),
        }
    }

    fn gen_meta_h(&self, files: &mut Files) -> Result<()> {
        let meta = &self.cfg.metadata;
        let mut body = String::new();
        writeln!(body)?;
        writeln!(
            body,
            "#define MM_APP_NAME \"{}\" /** Application name **/",
            meta.app_name
        )?;
        writeln!(body)?;
        writeln!(
            body,
            "#define MM_VERSION_STR \"{}\" /** Version string for the memory map interface **/",
            meta.version
        )?;
        writeln!(
            body,
            "#define MM_MAJOR_VERSION {} /** Major version of the memory map interface **/",
            meta.major_version
        )?;
        writeln!(
            body,
            "#define MM_MINOR_VERSION {} /** Minor version of the memory map interface **/",
            meta.minor_version
        )?;
        writeln!(
            body,
            "#define MM_PATCH_VERSION {} /** Patch version of the memory map interface **/",
            meta.patch_version
        )?;
        writeln!(body)?;
        writeln!(body)?;
        writeln!(
            body,
            "#define MM_FW_HASH  \"{}\" /** Hash for what effects the firmware */",
            meta.fw_hash
        )?;
        writeln!(
            body,
            "#define MM_HASH  \"{}\" /** Hash for the whole generated map */",
            meta.full_hash
        )?;

        let fname = "mm_meta.h";
        let text = self.render(fname, "meta", &[Section::new("defines", body)])?;
        files.insert(fname.to_string(), text);
        Ok(())
    }

    fn gen_cc_h(&self, files: &mut Files) -> Result<()> {
        let body = "\
#if defined(__GNUC__) || defined(__clang__)
#define MM_PACKED_START _Pragma(\"pack(push, 1)\")
#define MM_PACKED_END _Pragma(\"pack(pop)\")
#elif defined(_MSC_VER)
#define MM_PACKED_START __pragma(pack(push, 1))
#define MM_PACKED_END __pragma(pack(pop))
#else
#error \"Unsupported compiler, define MM_PACKED_START and MM_PACKED_END\"
#endif
"
        .to_string();
        let fname = "mm_cc.h";
        let text = self.render(fname, "cc", &[Section::new("macros", body)])?;
        files.insert(fname.to_string(), text);
        Ok(())
    }

    fn gen_typedef_type_h(&self, files: &mut Files, name: &str, typedef: &Typedef) -> Result<()> {
        let mut inc = String::from("#include <stdint.h>\n\n#include \"mm_cc.h\"\n");
        for dep in &typedef.deps {
            writeln!(inc, "#include \"mm_typedefs_{dep}.h\"")?;
        }
        if typedef.use_bitfields {
            inc.push_str(&includes(["mm_bitfields.h"]));
        }
        if typedef.use_enums {
            inc.push_str(&includes(["mm_enums.h"]));
        }
        if typedef.use_defines {
            inc.push_str(&includes(["mm_defs.h"]));
        }

        let mut body = String::new();
        if let Some(description) = &typedef.description {
            writeln!(body, "/** {description} */")?;
        }
        writeln!(body, "MM_PACKED_START")?;
        writeln!(body, "typedef union {{")?;
        writeln!(body, "    struct {{")?;
        for el in &typedef.elements {
            let array = el.resolved_array_size.map_or_else(String::new, |size| {
                format!("[{}]", self.c_expr(el.array_size.as_ref(), size))
            });
            writeln!(
                body,
                "        {} {}{array};{}",
                el.resolved_type,
                el.name,
                doc_suffix(el.description.as_deref())
            )?;
        }
        writeln!(body, "    }};")?;
        writeln!(
            body,
            "    uint8_t data[{}]; /**< Array for padding */",
            typedef.resolved_total_size
        )?;
        writeln!(body, "}} {name};")?;
        writeln!(body, "MM_PACKED_END")?;

        let fname = format!("mm_typedefs_{name}.h");
        let text = self.render(
            &fname,
            "typedefs",
            &[Section::new("includes", inc), Section::typedefs(body)],
        )?;
        files.insert(fname, text);
        Ok(())
    }

    fn gen_typedef_map_h(&self, files: &mut Files, map: &MemoryMap) -> Result<()> {
        let mut inc = includes(["mm_cc.h"]);
        if let Some(typedef) = self.cfg.typedef(&map.ty) {
            for dep in &typedef.deps {
                writeln!(inc, "#include \"mm_typedefs_{dep}.h\"")?;
            }
        }
        writeln!(inc, "#include \"mm_typedefs_{}.h\"", map.ty)?;
        let body = format!("typedef {} {};\n", map.ty, map.name);

        let fname = format!("mm_typedefs_{}.h", map.name);
        let text = self.render(
            &fname,
            &map.name,
            &[Section::new("includes", inc), Section::typedefs(body)],
        )?;
        files.insert(fname, text);
        Ok(())
    }

    fn gen_typedefs_h(&self, files: &mut Files) -> Result<()> {
        let mut inc = String::new();
        for map in &self.cfg.maps {
            writeln!(inc, "#include \"mm_typedefs_{}.h\"", map.name)?;
        }
        let fname = "mm_typedefs.h";
        let text = self.render(fname, "typedef", &[Section::new("includes", inc)])?;
        files.insert(fname.to_string(), text);
        Ok(())
    }

    fn gen_defs_h(&self, files: &mut Files) -> Result<()> {
        if self.cfg.defines.is_empty() {
            return Ok(());
        }
        let mut body = String::new();
        for (name, define) in &self.cfg.defines {
            writeln!(
                body,
                "#define {name} {}{}",
                define.resolved_value,
                doc_suffix(define.description.as_deref())
            )?;
        }
        let fname = "mm_defs.h";
        let text = self.render(fname, "defs", &[Section::new("defines", body)])?;
        files.insert(fname.to_string(), text);
        Ok(())
    }

    fn bitfield_body(&self, out: &mut String, name: &str, bitfield: &Bitfield) -> Result<()> {
        let ctype = bitfield.resolved_type.c_name();
        if let Some(description) = &bitfield.description {
            writeln!(out, "/** {description} */")?;
        }
        writeln!(out, "MM_PACKED_START")?;
        writeln!(out, "typedef union {{")?;
        writeln!(out, "    struct {{")?;
        for member in &bitfield.elements {
            writeln!(
                out,
                "        {ctype} {} : {};{}",
                member.name,
                self.c_expr(member.bits.as_ref(), member.resolved_bits),
                doc_suffix(member.description.as_deref())
            )?;
        }
        writeln!(out, "    }};")?;
        writeln!(
            out,
            "    uint8_t data[{}]; /**< Array for padding */",
            bitfield.resolved_type_size
        )?;
        writeln!(out, "}} {name};")?;
        writeln!(out, "MM_PACKED_END")?;
        Ok(())
    }

    fn gen_bitfields_h(&self, files: &mut Files) -> Result<()> {
        if self.cfg.bitfields.is_empty() {
            return Ok(());
        }
        let mut inc = String::from("#include <stdint.h>\n\n#include \"mm_cc.h\"\n");
        if !self.cfg.defines.is_empty() {
            inc.push_str(&includes(["mm_defs.h"]));
        }
        let mut body = String::new();
        for (i, (name, bitfield)) in self.cfg.bitfields.iter().enumerate() {
            if i > 0 {
                body.push('\n');
            }
            self.bitfield_body(&mut body, name, bitfield)?;
        }
        let fname = "mm_bitfields.h";
        let text = self.render(
            fname,
            "bitfields",
            &[Section::new("includes", inc), Section::new("bitfields", body)],
        )?;
        files.insert(fname.to_string(), text);
        Ok(())
    }

    fn enum_body(out: &mut String, name: &str, enumeration: &Enumeration) -> std::fmt::Result {
        let suffix = literal_suffix(enumeration.resolved_type);
        if let Some(description) = &enumeration.description {
            writeln!(out, "/** {description} */")?;
        }
        for member in &enumeration.elements {
            writeln!(
                out,
                "#define {}_{} ({}{suffix}){}",
                name.to_uppercase(),
                member.name.to_uppercase(),
                member.resolved_value,
                doc_suffix(member.description.as_deref())
            )?;
        }
        Ok(())
    }

    fn gen_enums_h(&self, files: &mut Files) -> Result<()> {
        if self.cfg.enums.is_empty() {
            return Ok(());
        }
        let mut body = String::new();
        for (i, (name, enumeration)) in self.cfg.enums.iter().enumerate() {
            if i > 0 {
                body.push('\n');
            }
            Self::enum_body(&mut body, name, enumeration)?;
        }
        let fname = "mm_enums.h";
        let text = self.render(fname, "enums", &[Section::new("defines", body)])?;
        files.insert(fname.to_string(), text);
        Ok(())
    }

    fn gen_access_files(&self, files: &mut Files) -> Result<()> {
        let users = &self.cfg.metadata.resolved_permission_users;
        if users.is_empty() {
            return Ok(());
        }

        let mut body = String::from("#define MM_ACCESS_READ_SHIFT (4)\n#define MM_ACCESS_WRITE_MASK (0x0F)\n\n");
        for (user, bit) in users.iter() {
            writeln!(body, "#define MM_ACCESS_USER_{} (0x{bit:02X})", user.to_uppercase())?;
        }
        let fname = "mm_access_types.h";
        let text = self.render(fname, "access", &[Section::new("defines", body)])?;
        files.insert(fname.to_string(), text);

        let mut all = includes(["mm_access_types.h"]);
        for map in &self.cfg.maps {
            let lower = map.name.to_lowercase();
            writeln!(all, "#include \"mm_access_{lower}.h\"")?;

            let inc = format!(
                "#include <stdint.h>\n\n#include \"mm_typedefs_{}.h\"\n",
                map.name
            );
            let decl = format!(
                "extern const uint8_t mm_access_{lower}[sizeof({})];\n",
                map.name
            );
            let fname = format!("mm_access_{lower}.h");
            let text = self.render(
                &fname,
                &map.name,
                &[Section::new("includes", inc), Section::new("variables", decl)],
            )?;
            files.insert(fname, text);

            let inc = includes([format!("mm_access_{lower}.h").as_str()]);
            let mut table = format!("const uint8_t mm_access_{lower}[{}] = {{\n", map.size);
            for chunk in access_table(map).chunks(ACCESS_PER_LINE) {
                let line: Vec<String> = chunk.iter().map(|a| format!("0x{a:02X},")).collect();
                writeln!(table, "    {}", line.join(" "))?;
            }
            table.push_str("};\n");
            let fname = format!("mm_access_{lower}.c");
            let text = self.render(
                &fname,
                &map.name,
                &[Section::new("includes", inc), Section::new("variables", table)],
            )?;
            files.insert(fname, text);
        }
        let fname = "mm_access.h";
        let text = self.render(fname, "access", &[Section::new("includes", all)])?;
        files.insert(fname.to_string(), text);
        Ok(())
    }

    fn gen_default_files(&self, files: &mut Files) -> Result<()> {
        for map in &self.cfg.maps {
            let defaults: Vec<(&str, String)> = map
                .records
                .iter()
                .filter_map(|rec| {
                    rec.resolved_scaled_default
                        .as_ref()
                        .or(rec.resolved_default.as_ref())
                        .map(|value| (rec.name.as_str(), value.to_string()))
                })
                .collect();
            if defaults.is_empty() {
                continue;
            }
            let lower = map.name.to_lowercase();
            let init = format!("void mm_default_{lower}_init({} *map)", map.name);

            let inc = includes([format!("mm_typedefs_{}.h", map.name).as_str()]);
            let decl = format!(
                "/**\n * @brief Set every record of a {} to its default value.\n */\n{init};\n",
                map.name
            );
            let fname = format!("mm_default_{lower}.h");
            let text = self.render(
                &fname,
                &map.name,
                &[Section::new("includes", inc), Section::new("functions", decl)],
            )?;
            files.insert(fname, text);

            let inc = includes([format!("mm_default_{lower}.h").as_str()]);
            let mut def = format!("{init}\n{{\n");
            for (name, value) in defaults {
                writeln!(def, "    map->{name} = {value};")?;
            }
            def.push_str("}\n");
            let fname = format!("mm_default_{lower}.c");
            let text = self.render(
                &fname,
                &map.name,
                &[Section::new("includes", inc), Section::new("functions", def)],
            )?;
            files.insert(fname, text);
        }
        Ok(())
    }
}

/// Access of every byte of a map: the OR of every record covering it.
fn access_table(map: &MemoryMap) -> Vec<u8> {
    let mut table = vec![0u8; map.size];
    for rec in &map.records {
        let end = (rec.map_offset + rec.resolved_type_size).min(map.size);
        for byte in table.iter_mut().take(end).skip(rec.map_offset) {
            *byte |= rec.resolved_access;
        }
    }
    table
}
