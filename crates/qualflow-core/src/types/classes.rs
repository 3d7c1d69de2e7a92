//! Class kinds and the supertype relation for the classes a unit can mention

use crate::hir::{ClassKind, HirModule};
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashSet, VecDeque};

const OBJECT: &str = "java.lang.Object";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub kind: ClassKind,
    pub supertypes: Vec<String>,
    /// Methods that must be called on every instance before it is dropped
    pub must_call: Vec<String>,
}

impl ClassInfo {
    fn class(supertypes: &[&str]) -> Self {
        Self {
            kind: ClassKind::Class,
            supertypes: supertypes.iter().map(|s| s.to_string()).collect(),
            must_call: Vec::new(),
        }
    }

    fn interface(supertypes: &[&str]) -> Self {
        Self {
            kind: ClassKind::Interface,
            ..Self::class(supertypes)
        }
    }
}

/// Known classes: a slice of the standard library plus the unit's own declarations
#[derive(Debug, Clone)]
pub struct ClassTable {
    classes: IndexMap<String, ClassInfo>,
}

impl ClassTable {
    pub fn with_builtins() -> Self {
        let mut table = Self {
            classes: IndexMap::new(),
        };
        let builtins: &[(&str, ClassInfo)] = &[
            (OBJECT, ClassInfo::class(&[])),
            ("java.lang.CharSequence", ClassInfo::interface(&[])),
            ("java.lang.String", ClassInfo::class(&["java.lang.CharSequence"])),
            ("java.lang.Number", ClassInfo::class(&[])),
            ("java.lang.Boolean", ClassInfo::class(&[])),
            ("java.lang.Character", ClassInfo::class(&[])),
            ("java.lang.Byte", ClassInfo::class(&["java.lang.Number"])),
            ("java.lang.Short", ClassInfo::class(&["java.lang.Number"])),
            ("java.lang.Integer", ClassInfo::class(&["java.lang.Number"])),
            ("java.lang.Long", ClassInfo::class(&["java.lang.Number"])),
            ("java.lang.Float", ClassInfo::class(&["java.lang.Number"])),
            ("java.lang.Double", ClassInfo::class(&["java.lang.Number"])),
            ("java.math.BigInteger", ClassInfo::class(&["java.lang.Number"])),
            ("java.math.BigDecimal", ClassInfo::class(&["java.lang.Number"])),
            ("java.util.Calendar", ClassInfo::class(&[])),
            ("java.util.Date", ClassInfo::class(&[])),
            ("java.util.Locale", ClassInfo::class(&[])),
            ("java.util.Comparator", ClassInfo::interface(&[])),
            ("java.lang.Iterable", ClassInfo::interface(&[])),
            ("java.util.Iterator", ClassInfo::interface(&[])),
            ("java.util.Collection", ClassInfo::interface(&["java.lang.Iterable"])),
            ("java.util.List", ClassInfo::interface(&["java.util.Collection"])),
            ("java.util.Set", ClassInfo::interface(&["java.util.Collection"])),
            ("java.util.ArrayList", ClassInfo::class(&["java.util.List"])),
            ("java.util.LinkedList", ClassInfo::class(&["java.util.List"])),
            ("java.util.HashSet", ClassInfo::class(&["java.util.Set"])),
            ("java.util.TreeSet", ClassInfo::class(&["java.util.Set"])),
            ("java.util.Map", ClassInfo::interface(&[])),
            ("java.util.HashMap", ClassInfo::class(&["java.util.Map"])),
            (
                "java.lang.AutoCloseable",
                ClassInfo {
                    must_call: vec!["close".to_string()],
                    ..ClassInfo::interface(&[])
                },
            ),
            ("java.io.Closeable", ClassInfo::interface(&["java.lang.AutoCloseable"])),
            ("java.io.InputStream", ClassInfo::class(&["java.io.Closeable"])),
            ("java.io.FileInputStream", ClassInfo::class(&["java.io.InputStream"])),
            ("java.io.OutputStream", ClassInfo::class(&["java.io.Closeable"])),
            ("java.io.PrintStream", ClassInfo::class(&[OBJECT])),
            ("java.net.Socket", ClassInfo::class(&["java.io.Closeable"])),
            ("java.util.Formatter", ClassInfo::class(&[OBJECT])),
        ];
        for (name, info) in builtins {
            table.insert(name, info.clone());
        }
        table
    }

    /// Builtins extended with every class declared in `module`
    pub fn for_module(module: &HirModule) -> Self {
        let mut table = Self::with_builtins();
        for class in &module.classes {
            let must_call = class
                .annotations
                .iter()
                .filter(|a| a.name == "MustCall")
                .flat_map(|a| a.strings_arg("value"))
                .collect();
            table.insert(
                &class.name,
                ClassInfo {
                    kind: class.kind,
                    supertypes: class.supertypes.clone(),
                    must_call,
                },
            );
        }
        table
    }

    pub fn insert(&mut self, name: &str, info: ClassInfo) {
        self.classes.insert(name.to_string(), info);
    }

    pub fn get(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(name)
    }

    pub fn kind_of(&self, name: &str) -> Option<ClassKind> {
        self.get(name).map(|c| c.kind)
    }

    /// Reflexive, transitive subclass test. Everything is a subclass of `Object`.
    pub fn is_subclass(&self, sub: &str, sup: &str) -> bool {
        if sub == sup || sup == OBJECT {
            return true;
        }
        self.ancestors(sub).contains(sup)
    }

    /// All proper supertypes reachable from `name`
    pub fn ancestors(&self, name: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([name]);
        while let Some(current) = queue.pop_front() {
            let Some(info) = self.classes.get(current) else {
                continue;
            };
            for sup in &info.supertypes {
                if seen.insert(sup.clone()) {
                    queue.push_back(sup);
                }
            }
        }
        seen
    }

    pub fn is_collection(&self, name: &str) -> bool {
        self.is_subclass(name, "java.util.Collection")
    }

    pub fn is_iterator(&self, name: &str) -> bool {
        self.is_subclass(name, "java.util.Iterator")
    }

    /// Must-call methods of `name` and its supertypes, sorted and without duplicates
    pub fn must_call_methods(&self, name: &str) -> Vec<String> {
        let mut methods: BTreeSet<String> = BTreeSet::new();
        let mut lineage = self.ancestors(name);
        lineage.insert(name.to_string());
        for class in lineage {
            if let Some(info) = self.classes.get(&class) {
                methods.extend(info.must_call.iter().cloned());
            }
        }
        methods.into_iter().collect()
    }
}

impl Default for ClassTable {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{AnnotationArg, DeclAnnotation, HirBuilder};

    #[test]
    fn test_collection_queries() {
        let table = ClassTable::with_builtins();
        assert!(table.is_collection("java.util.ArrayList"));
        assert!(table.is_collection("java.util.Set"));
        assert!(!table.is_collection("java.lang.String"));
        assert!(table.is_iterator("java.util.Iterator"));
        assert!(table.is_subclass("java.lang.Integer", "java.lang.Number"));
        assert!(table.is_subclass("Unknown", "java.lang.Object"));
    }

    #[test]
    fn test_must_call_inherited() {
        let table = ClassTable::with_builtins();
        assert_eq!(table.must_call_methods("java.net.Socket"), vec!["close"]);
        assert!(table.must_call_methods("java.lang.String").is_empty());
    }

    #[test]
    fn test_module_classes_registered() {
        let b = HirBuilder::new();
        let mut class = b.class("Conn", vec![], vec![]);
        class.annotations.push(DeclAnnotation::new("MustCall").arg(
            "value",
            AnnotationArg::Strings(vec!["release".into(), "close".into()]),
        ));
        let module = HirModule {
            file: "Conn.java".into(),
            classes: vec![class],
        };
        let table = ClassTable::for_module(&module);
        assert_eq!(table.must_call_methods("Conn"), vec!["close", "release"]);
        assert_eq!(table.kind_of("Conn"), Some(ClassKind::Class));
    }
}
