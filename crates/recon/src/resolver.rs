use crate::catalog::SchemaCatalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnTarget {
    /// Claimed by the field at `index`; `rank` is the alias position
    /// within that field's declared aliases (0 = canonical name).
    Field { index: usize, rank: usize },
    /// Source column of the catalog's derived rule `rule`.
    Derived { rule: usize },
    Unmatched,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumn {
    pub column: String,
    pub target: ColumnTarget,
}

/// Header of one batch mapped onto catalog fields.
#[derive(Debug, Clone)]
pub struct Resolution {
    columns: Vec<ResolvedColumn>,
    /// Per catalog field: header positions, ordered by (alias rank, position).
    by_field: Vec<Vec<usize>>,
    /// Per derived rule: first header position naming its column.
    by_rule: Vec<Option<usize>>,
}

impl Resolution {
    pub fn columns(&self) -> &[ResolvedColumn] {
        &self.columns
    }

    pub fn target(&self, column: &str) -> Option<ColumnTarget> {
        self.columns
            .iter()
            .find(|c| c.column == column)
            .map(|c| c.target)
    }

    pub fn unmatched(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(|c| c.target == ColumnTarget::Unmatched)
            .map(|c| c.column.as_str())
    }

    /// Header positions feeding field `index`, earliest alias first.
    pub fn sources_for(&self, index: usize) -> &[usize] {
        self.by_field.get(index).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Header position feeding derived rule `rule`, if the column is present.
    pub fn derived_source(&self, rule: usize) -> Option<usize> {
        self.by_rule.get(rule).copied().flatten()
    }

    /// True when `columns` is exactly the header this was resolved from.
    pub fn matches_header<'a>(&self, columns: impl Iterator<Item = &'a str>) -> bool {
        let mut n = 0;
        for (i, col) in columns.enumerate() {
            match self.columns.get(i) {
                Some(c) if c.column == col => n += 1,
                _ => return false,
            }
        }
        n == self.columns.len()
    }
}

/// Maps raw column names to catalog fields through the alias index.
///
/// Never fails: unknown columns resolve to `Unmatched`. Alias conflicts are
/// rejected at catalog load; the index keeps the first-declared owner.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    catalog: &'a SchemaCatalog,
}

impl<'a> Resolver<'a> {
    pub fn new(catalog: &'a SchemaCatalog) -> Self {
        Self { catalog }
    }

    pub fn resolve_column(&self, column: &str) -> ColumnTarget {
        if let Some((index, rank)) = self.catalog.lookup_index(column) {
            return ColumnTarget::Field { index, rank };
        }
        match self.catalog.lookup_derived(column) {
            Some(rule) => ColumnTarget::Derived { rule },
            None => ColumnTarget::Unmatched,
        }
    }

    pub fn resolve<S: AsRef<str>>(&self, header: &[S]) -> Resolution {
        let columns: Vec<ResolvedColumn> = header
            .iter()
            .map(|h| ResolvedColumn {
                column: h.as_ref().to_string(),
                target: self.resolve_column(h.as_ref()),
            })
            .collect();

        let mut ranked: Vec<Vec<(usize, usize)>> = vec![Vec::new(); self.catalog.len()];
        let mut by_rule: Vec<Option<usize>> = vec![None; self.catalog.derived().len()];
        for (pos, col) in columns.iter().enumerate() {
            match col.target {
                ColumnTarget::Field { index, rank } => ranked[index].push((rank, pos)),
                ColumnTarget::Derived { rule } => {
                    by_rule[rule].get_or_insert(pos);
                }
                ColumnTarget::Unmatched => {}
            }
        }
        let by_field = ranked
            .into_iter()
            .map(|mut v| {
                v.sort_unstable();
                v.into_iter().map(|(_, pos)| pos).collect()
            })
            .collect();

        Resolution {
            columns,
            by_field,
            by_rule,
        }
    }
}
