//! Symbol table: a tree of lexical scopes and the symbols declared in
//! them.

use std::collections::HashMap;
use std::fmt;

use crate::source::Position;
use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Variable,
    Parameter,
    Function,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SymbolKind::Variable => "variable",
            SymbolKind::Parameter => "parameter",
            SymbolKind::Function => "function",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Function(String),
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub id: SymbolId,
    pub name: String,
    pub kind: SymbolKind,
    pub ty: Type,
    pub declared_at: Position,
    pub scope: ScopeId,
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub id: ScopeId,
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    names: HashMap<String, SymbolId>,
}

#[derive(Debug, Clone)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    scopes: Vec<Scope>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// A table holding only the global scope.
    pub fn new() -> Self {
        SymbolTable {
            symbols: Vec::new(),
            scopes: vec![Scope {
                id: ScopeId(0),
                kind: ScopeKind::Global,
                parent: None,
                names: HashMap::new(),
            }],
        }
    }

    pub fn global_scope(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn push_scope(&mut self, kind: ScopeKind, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope {
            id,
            kind,
            parent: Some(parent),
            names: HashMap::new(),
        });
        id
    }

    /// Declare `name` in `scope`. On a clash the existing symbol is
    /// returned as the error.
    pub fn declare(
        &mut self,
        scope: ScopeId,
        name: &str,
        kind: SymbolKind,
        ty: Type,
        declared_at: Position,
    ) -> Result<SymbolId, SymbolId> {
        if let Some(existing) = self.scopes[scope.0].names.get(name) {
            return Err(*existing);
        }
        let id = SymbolId(self.symbols.len());
        self.symbols.push(Symbol {
            id,
            name: name.to_string(),
            kind,
            ty,
            declared_at,
            scope,
        });
        self.scopes[scope.0].names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Resolve `name` from `scope` outwards.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let scope = &self.scopes[id.0];
            if let Some(symbol) = scope.names.get(name) {
                return Some(*symbol);
            }
            current = scope.parent;
        }
        None
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0]
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    /// The function whose body encloses `scope`, if any.
    pub fn enclosing_function(&self, scope: ScopeId) -> Option<&str> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let scope = &self.scopes[id.0];
            if let ScopeKind::Function(name) = &scope.kind {
                return Some(name);
            }
            current = scope.parent;
        }
        None
    }

    /// Human-readable label of a scope for the symbols artifact.
    pub fn scope_label(&self, id: ScopeId) -> String {
        match &self.scopes[id.0].kind {
            ScopeKind::Global => "global".to_string(),
            ScopeKind::Function(name) => format!("funcion {name}"),
            ScopeKind::Block => match self.enclosing_function(id) {
                Some(name) => format!("block#{} in {name}", id.0),
                None => format!("block#{}", id.0),
            },
        }
    }

    /// Render the `symbols` artifact.
    pub fn format_table(&self) -> String {
        if self.symbols.is_empty() {
            return "(no symbols)\n".to_string();
        }
        let mut out = format!(
            "{:<5} {:<20} {:<10} {:<12} {:>5} {:>5}  {}\n",
            "#", "NAME", "KIND", "TYPE", "LINE", "COL", "SCOPE"
        );
        out.push_str(&"-".repeat(72));
        out.push('\n');
        for symbol in &self.symbols {
            out.push_str(&format!(
                "{:<5} {:<20} {:<10} {:<12} {:>5} {:>5}  {}\n",
                symbol.id.0 + 1,
                symbol.name,
                symbol.kind.to_string(),
                symbol.ty.to_string(),
                symbol.declared_at.line,
                symbol.declared_at.column,
                self.scope_label(symbol.scope)
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique_per_scope_but_may_shadow() {
        let mut table = SymbolTable::new();
        let global = table.global_scope();
        let x = table
            .declare(global, "x", SymbolKind::Variable, Type::Integer, Position::new(1, 5))
            .expect("first declaration");
        let clash = table.declare(global, "x", SymbolKind::Variable, Type::Real, Position::new(2, 5));
        assert_eq!(clash, Err(x));

        let block = table.push_scope(ScopeKind::Block, global);
        let inner = table
            .declare(block, "x", SymbolKind::Variable, Type::Str, Position::new(3, 9))
            .expect("shadowing is allowed");
        assert_eq!(table.lookup(block, "x"), Some(inner));
        assert_eq!(table.lookup(global, "x"), Some(x));
        assert_eq!(table.lookup(block, "y"), None);
    }

    #[test]
    fn labels_scopes_and_finds_enclosing_function() {
        let mut table = SymbolTable::new();
        let global = table.global_scope();
        let func = table.push_scope(ScopeKind::Function("f".into()), global);
        let block = table.push_scope(ScopeKind::Block, func);
        assert_eq!(table.enclosing_function(block), Some("f"));
        assert_eq!(table.enclosing_function(global), None);
        assert_eq!(table.scope_label(block), "block#2 in f");
        assert_eq!(table.scope_label(func), "funcion f");
    }

    #[test]
    fn formats_table_rows_in_declaration_order() {
        let mut table = SymbolTable::new();
        let global = table.global_scope();
        table
            .declare(global, "total", SymbolKind::Variable, Type::Real, Position::new(4, 5))
            .expect("declare");
        let text = table.format_table();
        let row = text.lines().nth(2).expect("row");
        assert!(row.starts_with("1     total"));
        assert!(row.contains("real"));
        assert!(row.ends_with("global"));
        assert_eq!(SymbolTable::new().format_table(), "(no symbols)\n");
    }
}
