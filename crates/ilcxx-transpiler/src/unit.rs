//! Output assembly: the sections accumulated during a run, rendered as a
//! single translation unit or split into a header, definition files and
//! an entry-point file.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::Result;

/// Definition file group of a function body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Partition {
    /// Members of value types, interfaces and arrays.
    ValueLike,
    /// Generic instantiations.
    Generic,
    Other,
}

const PRELUDE: &str = "#include \"ilcxx.h\"\n\nnamespace ilcxx\n{\n";
const EPILOGUE: &str = "\n}\n";

/// Generated C++ text, section by section. Sections are append-only
/// during a run.
#[derive(Clone, Debug, Default)]
pub struct TranslationUnit {
    pub type_declarations: String,
    pub type_definitions: String,
    pub function_declarations: String,
    /// `t__type_of<T>` specializations: v-tables and interface tables.
    pub descriptor_declarations: String,
    /// Static holder structs, one per type with statics.
    pub static_definitions: String,
    /// Members of `t_static`.
    pub static_declarations: String,
    /// Members of `t_thread_static`.
    pub thread_static_declarations: String,
    pub field_declarations: String,
    pub field_definitions: String,
    /// Descriptor constructors and instances.
    pub member_definitions: String,
    pub function_definitions: Vec<(Partition, String)>,
    pub finalizer: String,
    pub main: String,
    definition_files: usize,
}

impl TranslationUnit {
    pub(crate) fn new(definition_files: usize) -> Self {
        Self {
            definition_files,
            ..Self::default()
        }
    }

    fn holders(&self) -> String {
        format!(
            "\nstruct t_static\n{{\n\tstatic t_static* v_instance;\n{}\tt_static()\n\t{{\n\t\tv_instance = this;\n\t}}\n\t~t_static()\n\t{{\n\t\tv_instance = nullptr;\n\t}}\n}};\n\nstruct t_thread_static\n{{\n\tstatic thread_local t_thread_static* v_instance;\n{}\tt_thread_static()\n\t{{\n\t\tv_instance = this;\n\t}}\n\t~t_thread_static()\n\t{{\n\t\tv_instance = nullptr;\n\t}}\n}};\n",
            self.static_declarations, self.thread_static_declarations
        )
    }

    fn declarations(&self) -> String {
        let mut out = String::new();
        for section in [
            &self.type_declarations,
            &self.type_definitions,
            &self.function_declarations,
            &self.descriptor_declarations,
            &self.static_definitions,
        ] {
            out.push_str(section);
        }
        out.push_str(&self.holders());
        out.push_str(&self.field_declarations);
        out
    }

    fn instances(&self) -> &'static str {
        "\nt_static* t_static::v_instance;\nthread_local t_thread_static* t_thread_static::v_instance;\n"
    }

    /// The whole program as one translation unit.
    pub fn render(&self) -> String {
        let mut out = String::from(PRELUDE);
        out.push_str(&self.declarations());
        out.push_str(&self.field_definitions);
        out.push_str(&self.member_definitions);
        for (_, body) in &self.function_definitions {
            out.push_str(body);
        }
        out.push_str(self.instances());
        out.push_str(&self.finalizer);
        out.push_str(EPILOGUE);
        out.push_str(&self.main);
        out
    }

    /// Number of `definitions{N}.cc` files in the split form.
    pub fn definition_files(&self) -> usize {
        self.definition_files.max(1)
    }

    /// File index of each function body: value-like bodies go to the first
    /// file, generic instances to the second, and the rest round-robin
    /// over the remaining files.
    fn route(&self) -> Vec<usize> {
        let n = self.definition_files();
        let mut next = 0;
        self.function_definitions
            .iter()
            .map(|(partition, _)| match partition {
                Partition::ValueLike => 0,
                Partition::Generic => 1 % n,
                Partition::Other if n <= 2 => 2 % n,
                Partition::Other => {
                    let file = 2 + next % (n - 2);
                    next += 1;
                    file
                }
            })
            .collect()
    }

    /// The program as `(file name, content)` pairs: `declarations.h`,
    /// `definitions{N}.cc` and `main.cc`.
    pub fn split(&self) -> Vec<(String, String)> {
        let include = "#include \"declarations.h\"\n\nnamespace ilcxx\n{\n";
        let mut files = Vec::with_capacity(self.definition_files() + 2);
        files.push((
            "declarations.h".to_owned(),
            format!("#pragma once\n\n{PRELUDE}{}{EPILOGUE}", self.declarations()),
        ));
        let mut definitions = vec![String::from(include); self.definition_files()];
        for ((_, body), file) in self.function_definitions.iter().zip(self.route()) {
            definitions[file].push_str(body);
        }
        for (i, mut text) in definitions.into_iter().enumerate() {
            text.push_str(EPILOGUE);
            files.push((format!("definitions{i}.cc"), text));
        }
        files.push((
            "main.cc".to_owned(),
            format!(
                "{include}{}{}{}{}{EPILOGUE}{}",
                self.member_definitions,
                self.field_definitions,
                self.instances(),
                self.finalizer,
                self.main
            ),
        ));
        files
    }

    /// Write the split form into `dir`, creating it if needed.
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        for (name, content) in self.split() {
            let path = dir.join(&name);
            debug!(path = %path.display(), bytes = content.len(), "writing");
            fs::write(path, content)?;
        }
        Ok(())
    }

    /// CRC-32 of the rendered unit.
    pub fn fingerprint(&self) -> u32 {
        crc32fast::hash(self.render().as_bytes())
    }
}
