//! Expression → SQL fragment compilation.

use super::BuildContext;
use super::fragment::Fragment;
use super::params::ParamSet;
use super::reader::{IncludeWiring, ReaderField};
use super::resolver::{AliasResolver, SourceKind};
use crate::dialect::translate::Operand;
use crate::dialect::{Dialect, Rule, TypeTag, lookup};
use crate::error::{OrmError, OrmResult};
use crate::expr::{BinaryOp, Expr, Lambda, UnaryOp, eval};
use crate::mapping::{Catalog, EntityMap, MemberMap, NavigationKind, ValueConverter};
use crate::value::{Value, ValueType};
use std::sync::Arc;

/// What a parameter-rooted member path resolved to.
enum Resolved {
    Scalar(Fragment),
    Object(Vec<ReaderField>, ValueType),
    Navigation { segment: usize, member: MemberMap },
}

/// An operand after rendering, owned so rule emitters can borrow it.
struct RenderedOperand {
    sql: String,
    value_type: ValueType,
    constant: Option<Value>,
    list_len: Option<usize>,
}

/// Compiles expressions for one statement.
///
/// Owns the statement's parameter collection and alias resolver; neither is
/// shared across builds.
#[derive(Debug)]
pub struct Compiler<'a> {
    pub(crate) ctx: &'a BuildContext<'a>,
    pub(crate) params: ParamSet,
    pub(crate) resolver: AliasResolver,
}

impl<'a> Compiler<'a> {
    /// Compiler for statements over aliased sources (queries).
    pub fn new(ctx: &'a BuildContext<'a>) -> Self {
        Self {
            ctx,
            params: ParamSet::with_prefix(ctx.param_prefix.clone()),
            resolver: AliasResolver::qualified(),
        }
    }

    /// Compiler for single-table mutations; columns render unqualified.
    pub fn unqualified(ctx: &'a BuildContext<'a>) -> Self {
        Self {
            resolver: AliasResolver::unqualified(),
            ..Self::new(ctx)
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.ctx.dialect
    }

    pub fn catalog(&self) -> &'a Catalog {
        self.ctx.catalog
    }

    // ==================== Sources ====================

    pub(crate) fn table_sql(&self, map: &EntityMap, physical: Option<&str>) -> String {
        self.dialect()
            .table(map.schema(), physical.unwrap_or_else(|| map.table()))
    }

    /// Physical table of a joined entity. A sharded join target must resolve
    /// to exactly one table.
    pub(crate) fn join_table(&self, map: &EntityMap) -> OrmResult<String> {
        match self.ctx.shard_tables(map.name()) {
            None => Ok(self.table_sql(map, None)),
            Some([one]) => Ok(self.table_sql(map, Some(one))),
            Some(tables) => Err(OrmError::invalid_operation(format!(
                "joined entity '{}' spans {} shard tables; only the primary source may fan out",
                map.name(),
                tables.len()
            ))),
        }
    }

    pub(crate) fn column_sql(&self, segment: usize, column: &str) -> String {
        let d = self.dialect();
        match &self.resolver.segment(segment).alias {
            Some(alias) => format!("{alias}.{}", d.ident(column)),
            None => d.ident(column),
        }
    }

    fn member_fragment(&self, segment: usize, member: &MemberMap) -> Fragment {
        let mut frag = Fragment::column(self.column_sql(segment, &member.column), member.value_type.clone());
        frag.native_type = member.native_type.clone();
        frag.converter = member.converter.clone();
        frag
    }

    /// One reader field per mapped column of an entity source.
    pub(crate) fn entity_fields(&self, segment: usize, map: &EntityMap) -> Vec<ReaderField> {
        map.columns()
            .map(|m| {
                let mut f = ReaderField::scalar(&m.name, self.column_sql(segment, &m.column), m.value_type.clone());
                f.source_member = Some(m.name.clone());
                f.converter = m.converter.clone();
                f
            })
            .collect()
    }

    fn segment_entity(&self, segment: usize) -> OrmResult<Arc<EntityMap>> {
        match &self.resolver.segment(segment).kind {
            SourceKind::Entity(map) => Ok(Arc::clone(map)),
            _ => Err(OrmError::invalid_operation("navigation requires an entity source")),
        }
    }

    /// LEFT JOIN a to-one navigation target, once per owner segment and member.
    fn navigation_join(&mut self, segment: usize, owner: &EntityMap, member: &MemberMap) -> OrmResult<usize> {
        let path = format!("{segment}.{}", member.name);
        if let Some(idx) = self.resolver.find_nav(&path) {
            return Ok(idx);
        }
        if self.resolver.segment(segment).alias.is_none() {
            return Err(OrmError::unsupported(format!(
                "navigation '{}.{}' in a single-table statement",
                owner.name(),
                member.name
            )));
        }
        let nav = member
            .navigation
            .as_ref()
            .ok_or_else(|| OrmError::mapping(format!("'{}' is not a navigation", member.name)))?;
        let target = self.catalog().entity(&nav.target)?;
        let key = target.key_members().next().cloned().ok_or_else(|| {
            OrmError::mapping(format!("navigation target '{}' has no key", target.name()))
        })?;
        let foreign_key = owner.member(&nav.foreign_key)?.column.clone();
        let source = self.join_table(&target)?;
        let owner_column = self.column_sql(segment, &foreign_key);

        let idx = self
            .resolver
            .add_nav_join(SourceKind::Entity(target), source, String::new(), path);
        let on = format!("{} = {owner_column}", self.column_sql(idx, &key.column));
        self.resolver.set_join_condition(idx, on);
        Ok(idx)
    }

    // ==================== Member resolution ====================

    fn resolve_path(&mut self, root: &str, path: &[&str], expr: &Expr) -> OrmResult<Resolved> {
        let mut segment = self.resolver.lookup(root)?;
        let mut i = 0;
        loop {
            let kind = self.resolver.segment(segment).kind.clone();
            match kind {
                SourceKind::Entity(map) => {
                    let Some(name) = path.get(i) else {
                        let fields = self.entity_fields(segment, &map);
                        return Ok(Resolved::Object(fields, ValueType::Object(map.name().to_string())));
                    };
                    let member = map.member(name)?.clone();
                    if let Some(nav) = &member.navigation {
                        if i + 1 == path.len() {
                            return Ok(Resolved::Navigation { segment, member });
                        }
                        if nav.kind == NavigationKind::ToMany {
                            return Err(OrmError::unsupported(expr));
                        }
                        segment = self.navigation_join(segment, &map, &member)?;
                        i += 1;
                        continue;
                    }
                    if member.ignored {
                        return Err(OrmError::missing_member(map.name(), member.name.as_str()));
                    }
                    let frag = self.member_fragment(segment, &member);
                    return self.type_members(frag, &path[i + 1..], expr).map(Resolved::Scalar);
                }
                SourceKind::Derived { fields } | SourceKind::Projection { fields } => {
                    return self.resolve_fields(&fields, &path[i..], expr);
                }
                SourceKind::Grouping { key, scalar_key, .. } => {
                    return match path.get(i) {
                        Some(&"key") if scalar_key => {
                            let field = key.first().ok_or_else(|| OrmError::unsupported(expr))?;
                            let frag = field_fragment(field);
                            self.type_members(frag, &path[i + 1..], expr).map(Resolved::Scalar)
                        }
                        Some(&"key") => self.resolve_fields(&key, &path[i + 1..], expr),
                        Some(other) => Err(OrmError::missing_member("grouping", *other)),
                        None => Err(OrmError::unsupported(expr)),
                    };
                }
                SourceKind::Excluded { entity, columns } => {
                    let Some(name) = path.get(i) else {
                        return Err(OrmError::unsupported(expr));
                    };
                    let member = entity.member(name)?;
                    if !columns.contains(&member.column) {
                        return Err(OrmError::invalid_operation(format!(
                            "excluded value of '{}' is not part of the inserted columns",
                            member.name
                        )));
                    }
                    let mut frag = Fragment::sql(self.dialect().excluded(&member.column), member.value_type.clone(), true);
                    frag.converter = member.converter.clone();
                    return self.type_members(frag, &path[i + 1..], expr).map(Resolved::Scalar);
                }
            }
        }
    }

    fn resolve_fields(&mut self, fields: &[ReaderField], path: &[&str], expr: &Expr) -> OrmResult<Resolved> {
        let mut fields = fields;
        let mut value_type = ValueType::Unknown;
        for (i, name) in path.iter().enumerate() {
            let field = ReaderField::find(fields, name)
                .ok_or_else(|| OrmError::missing_member("projection", *name))?;
            if field.is_object() {
                value_type = field.value_type.clone();
                fields = &field.children;
                continue;
            }
            let frag = field_fragment(field);
            return self.type_members(frag, &path[i + 1..], expr).map(Resolved::Scalar);
        }
        Ok(Resolved::Object(fields.to_vec(), value_type))
    }

    /// Apply trailing built-in members (`o.placed.year`) through translation rules.
    fn type_members(&mut self, mut frag: Fragment, members: &[&str], expr: &Expr) -> OrmResult<Fragment> {
        for name in members {
            frag = self.apply_rule(None, name, vec![frag], expr)?;
        }
        Ok(frag)
    }

    // ==================== Binding ====================

    /// Bind a value, converting it first when a converter applies.
    pub(crate) fn bind_value(
        &mut self,
        value: Value,
        variable: Option<&str>,
        converter: Option<&Arc<dyn ValueConverter>>,
    ) -> OrmResult<String> {
        let value = to_db(value, converter)?;
        if !value.is_bindable() {
            return Err(OrmError::unsupported(format!(
                "a {} value cannot be bound as a parameter",
                value.kind_name()
            )));
        }
        Ok(match variable {
            Some(name) => self.params.bind_variable(name, value),
            None => self.params.bind(value),
        })
    }

    /// SQL text of a fragment, binding it if it is a constant.
    pub fn render(&mut self, frag: Fragment) -> OrmResult<String> {
        match frag.constant {
            Some(v) => self.bind_value(v, frag.variable.as_deref(), frag.converter.as_ref()),
            None => Ok(frag.sql),
        }
    }

    /// SQL text of a fragment used as a value inside a larger expression.
    pub fn operand(&mut self, frag: Fragment) -> OrmResult<String> {
        if frag.predicate {
            return Ok(match self.dialect() {
                Dialect::SqlServer => format!("CASE WHEN {} THEN 1 ELSE 0 END", frag.sql),
                _ => format!("({})", frag.sql),
            });
        }
        self.render(frag)
    }

    /// SQL text of a fragment used as a condition.
    pub fn predicate(&mut self, frag: Fragment, expr: &Expr) -> OrmResult<String> {
        if frag.predicate {
            return Ok(frag.sql);
        }
        if let Some(v) = &frag.constant {
            return match v.as_bool() {
                Some(true) => Ok("1 = 1".to_string()),
                Some(false) => Ok(self.dialect().false_predicate().to_string()),
                None => Err(OrmError::unsupported(expr)),
            };
        }
        if frag.value_type == ValueType::Bool {
            let literal = self.dialect().bool_literal(true);
            return Ok(format!("{} = {literal}", frag.sql));
        }
        Err(OrmError::unsupported(expr))
    }

    // ==================== Lambdas ====================

    /// Run `f` with the lambda's parameters bound to the current scope.
    pub fn with_lambda<T>(
        &mut self,
        lambda: &Lambda,
        f: impl FnOnce(&mut Self, &Expr) -> OrmResult<T>,
    ) -> OrmResult<T> {
        self.resolver.bind(lambda)?;
        let out = f(self, &lambda.body);
        self.resolver.unbind();
        out
    }

    /// Compile a lambda body as a WHERE/HAVING/ON condition.
    pub fn condition(&mut self, lambda: &Lambda) -> OrmResult<String> {
        self.with_lambda(lambda, |c, body| {
            let frag = c.compile(body)?;
            c.predicate(frag, body)
        })
    }

    /// Compile a lambda body as a value.
    pub fn value(&mut self, lambda: &Lambda) -> OrmResult<Fragment> {
        self.with_lambda(lambda, |c, body| c.compile(body))
    }

    /// Resolve a selector that must name one mapped column directly (`u => u.name`).
    pub fn member_selector(&mut self, lambda: &Lambda) -> OrmResult<MemberMap> {
        self.with_lambda(lambda, |c, body| {
            let (root, path) = body.member_path().ok_or_else(|| OrmError::unsupported(body))?;
            let [name] = path.as_slice() else {
                return Err(OrmError::unsupported(body));
            };
            let segment = c.resolver.lookup(root)?;
            match &c.resolver.segment(segment).kind {
                SourceKind::Entity(map) => {
                    let member = map.member(name)?;
                    if member.is_column() {
                        Ok(member.clone())
                    } else {
                        Err(OrmError::unsupported(body))
                    }
                }
                _ => Err(OrmError::unsupported(body)),
            }
        })
    }

    // ==================== Expressions ====================

    /// Compile one expression node.
    pub fn compile(&mut self, expr: &Expr) -> OrmResult<Fragment> {
        match expr {
            Expr::Constant(v) => Ok(Fragment::constant(v.clone())),
            Expr::Variable { name, value } => Ok(Fragment::variable(name.clone(), value.clone())),
            Expr::Host { .. } => fold(expr),
            Expr::Param(_) | Expr::Member { .. } => self.member(expr),
            Expr::Call {
                target,
                tag,
                method,
                args,
            } => self.call(target.as_deref(), *tag, method, args, expr),
            Expr::Binary { op, left, right } => self.binary(*op, left, right, expr),
            Expr::Unary { op, operand } => self.unary(*op, operand, expr),
            Expr::Conditional {
                test,
                then,
                otherwise,
            } => self.conditional(test, then, otherwise, expr),
            Expr::New { .. } if !expr.contains_param() => fold(expr),
            Expr::New { .. } | Expr::Lambda(_) => Err(OrmError::unsupported(expr)),
        }
    }

    fn member(&mut self, expr: &Expr) -> OrmResult<Fragment> {
        if let Some((root, path)) = expr.member_path() {
            return match self.resolve_path(root, &path, expr)? {
                Resolved::Scalar(frag) => Ok(frag),
                _ => Err(OrmError::unsupported(expr)),
            };
        }
        if !expr.contains_param() {
            return fold(expr);
        }
        let Expr::Member { target, member } = expr else {
            return Err(OrmError::unsupported(expr));
        };
        let frag = self.compile(target)?;
        self.apply_rule(None, member, vec![frag], expr)
    }

    fn call(
        &mut self,
        target: Option<&Expr>,
        tag: Option<TypeTag>,
        method: &str,
        args: &[Expr],
        expr: &Expr,
    ) -> OrmResult<Fragment> {
        if let Some(Expr::Param(name)) = target {
            let segment = self.resolver.lookup(name)?;
            if let SourceKind::Grouping { elements, .. } = &self.resolver.segment(segment).kind {
                let elements = elements.clone();
                return self.aggregate(&elements, method, args, expr);
            }
        }
        let mut operands = Vec::with_capacity(args.len() + 1);
        if let Some(t) = target {
            operands.push(self.compile(t)?);
        }
        for arg in args {
            if matches!(arg, Expr::Lambda(_)) {
                return Err(OrmError::unsupported(expr));
            }
            operands.push(self.compile(arg)?);
        }
        self.apply_rule(tag, method, operands, expr)
    }

    fn rule(&self, tag: TypeTag, name: &str) -> Option<Arc<Rule>> {
        let dialect = self.dialect();
        lookup(dialect, tag, name).or_else(|| {
            (tag == TypeTag::Date)
                .then(|| lookup(dialect, TypeTag::DateTime, name))
                .flatten()
        })
    }

    /// Translate a built-in operation over compiled operands.
    fn apply_rule(
        &mut self,
        tag: Option<TypeTag>,
        name: &str,
        operands: Vec<Fragment>,
        expr: &Expr,
    ) -> OrmResult<Fragment> {
        let all_constant = operands.iter().all(Fragment::is_constant);
        let tag = tag.or_else(|| operands.first().and_then(|f| TypeTag::for_type(&f.value_type)));
        let Some(tag) = tag else {
            return if all_constant { fold(expr) } else { Err(OrmError::unsupported(expr)) };
        };
        let name = if tag == TypeTag::Collection
            && name == "contains"
            && operands.first().is_some_and(|f| f.has_field)
        {
            "contains_column"
        } else {
            name
        };

        let Some(rule) = self.rule(tag, name) else {
            if all_constant {
                let values = operands.into_iter().filter_map(|f| f.constant).collect();
                return eval::call_builtin(Some(tag), name, values, expr).map(Fragment::constant);
            }
            return Err(OrmError::unsupported(expr));
        };
        if all_constant && let Some(eval) = rule.eval {
            let values: Vec<Value> = operands.into_iter().filter_map(|f| f.constant).collect();
            return eval(&values).map(Fragment::constant);
        }
        for idx in rule.inline {
            if !operands.get(*idx).is_some_and(Fragment::is_constant) {
                return Err(OrmError::unsupported(format!("{expr}: argument {idx} must be a constant")));
            }
        }

        let expand_list = tag == TypeTag::Collection && name == "contains";
        let item_converter = operands.get(1).and_then(|f| f.converter.clone());
        let has_field = operands.iter().any(|f| f.has_field);
        let mut rendered = Vec::with_capacity(operands.len());
        for (i, frag) in operands.into_iter().enumerate() {
            let value_type = frag.value_type.clone();
            if rule.inline.contains(&i) {
                rendered.push(RenderedOperand {
                    sql: String::new(),
                    value_type,
                    constant: frag.constant,
                    list_len: None,
                });
                continue;
            }
            let Some(value) = frag.constant.clone() else {
                let sql = self.operand(frag)?;
                rendered.push(RenderedOperand {
                    sql,
                    value_type,
                    constant: None,
                    list_len: None,
                });
                continue;
            };
            if expand_list && i == 0 {
                let items = match value {
                    Value::Array(items) => items,
                    Value::Null => Vec::new(),
                    other => vec![other],
                };
                let mut markers = Vec::with_capacity(items.len());
                for item in items {
                    markers.push(self.bind_value(item, None, item_converter.as_ref())?);
                }
                rendered.push(RenderedOperand {
                    sql: markers.join(", "),
                    value_type,
                    constant: None,
                    list_len: Some(markers.len()),
                });
                continue;
            }
            let (value, variable) = match rule.prepare {
                Some(prepare) => (prepare(i, value)?, None),
                None => (value, frag.variable.as_deref()),
            };
            let sql = self.bind_value(value.clone(), variable, frag.converter.as_ref())?;
            rendered.push(RenderedOperand {
                sql,
                value_type,
                constant: Some(value),
                list_len: None,
            });
        }

        let ops: Vec<Operand<'_>> = rendered
            .iter()
            .map(|r| Operand {
                sql: &r.sql,
                value_type: &r.value_type,
                constant: r.constant.as_ref(),
                list_len: r.list_len,
            })
            .collect();
        let sql = (rule.emit)(&ops)?;
        let types: Vec<&ValueType> = rendered.iter().map(|r| &r.value_type).collect();
        let value_type = rule.result_type(&types);

        let mut out = Fragment::sql(sql, value_type, has_field);
        out.predicate = out.value_type == ValueType::Bool;
        out.negatable = rule.negatable;
        Ok(out)
    }

    fn binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr, expr: &Expr) -> OrmResult<Fragment> {
        let mut l = self.compile(left)?;
        let mut r = self.compile(right)?;
        if let (Some(a), Some(b)) = (&l.constant, &r.constant) {
            return eval::binary(op, a.clone(), b.clone()).map(Fragment::constant);
        }
        if op.is_logical() {
            return self.logical(op, l, r, expr);
        }
        let has_field = l.has_field || r.has_field;

        if matches!(op, BinaryOp::Eq | BinaryOp::Ne) && (l.is_null_constant() || r.is_null_constant()) {
            let side = if l.is_null_constant() { r } else { l };
            let sql = self.operand(side)?;
            let test = if op == BinaryOp::Eq { "IS NULL" } else { "IS NOT NULL" };
            return Ok(Fragment::sql(format!("{sql} {test}"), ValueType::Bool, has_field).as_predicate());
        }
        share_converter(&mut l, &mut r);

        if op.is_comparison() {
            let ls = self.operand(l)?;
            let rs = self.operand(r)?;
            return Ok(Fragment::sql(format!("{ls} {} {rs}", op.sql()), ValueType::Bool, has_field).as_predicate());
        }

        let (lt, rt) = (l.value_type.clone(), r.value_type.clone());
        if op == BinaryOp::Coalesce {
            let converter = l.converter.clone().or_else(|| r.converter.clone());
            let ls = self.operand(l)?;
            let rs = self.operand(r)?;
            let mut out = Fragment::sql(format!("COALESCE({ls}, {rs})"), lt.merge(&rt), has_field);
            out.converter = converter;
            return Ok(out);
        }
        if op == BinaryOp::Add && (lt == ValueType::Text || rt == ValueType::Text) {
            let ls = self.operand(l)?;
            let rs = self.operand(r)?;
            return Ok(Fragment::sql(self.dialect().concat(&[&ls, &rs]), ValueType::Text, has_field));
        }
        if lt.is_temporal() && rt == ValueType::Interval && matches!(op, BinaryOp::Add | BinaryOp::Sub) {
            let r = if op == BinaryOp::Sub { self.negated(r)? } else { r };
            return self.apply_rule(Some(TypeTag::DateTime), "add", vec![l, r], expr);
        }
        if op == BinaryOp::Sub && lt.is_temporal() && rt.is_temporal() {
            return self.apply_rule(Some(TypeTag::DateTime), "subtract", vec![l, r], expr);
        }

        let ls = self.operand(l)?;
        let rs = self.operand(r)?;
        Ok(Fragment::sql(format!("({ls} {} {rs})", op.sql()), lt.merge(&rt), has_field))
    }

    fn logical(&mut self, op: BinaryOp, l: Fragment, r: Fragment, expr: &Expr) -> OrmResult<Fragment> {
        if let Some(b) = l.constant.as_ref().and_then(Value::as_bool) {
            return Ok(short_circuit(op, b, r));
        }
        if let Some(b) = r.constant.as_ref().and_then(Value::as_bool) {
            return Ok(short_circuit(op, b, l));
        }
        let negatable = l.negatable && r.negatable;
        let ls = self.predicate(l, expr)?;
        let rs = self.predicate(r, expr)?;
        let mut out = Fragment::sql(format!("({ls} {} {rs})", op.sql()), ValueType::Bool, true).as_predicate();
        out.negatable = negatable;
        Ok(out)
    }

    fn negated(&mut self, frag: Fragment) -> OrmResult<Fragment> {
        if let Some(v) = frag.constant {
            return eval::unary(UnaryOp::Neg, v).map(Fragment::constant);
        }
        let value_type = frag.value_type.clone();
        let has_field = frag.has_field;
        let sql = self.operand(frag)?;
        Ok(Fragment::sql(format!("-({sql})"), value_type, has_field))
    }

    fn unary(&mut self, op: UnaryOp, operand: &Expr, expr: &Expr) -> OrmResult<Fragment> {
        let frag = self.compile(operand)?;
        if let Some(v) = frag.constant {
            return eval::unary(op, v).map(Fragment::constant);
        }
        match op {
            UnaryOp::Neg => self.negated(frag),
            UnaryOp::Not => {
                if !frag.negatable {
                    return Err(OrmError::unsupported(expr));
                }
                let has_field = frag.has_field;
                let sql = self.predicate(frag, expr)?;
                Ok(Fragment::sql(format!("NOT ({sql})"), ValueType::Bool, has_field).as_predicate())
            }
        }
    }

    fn conditional(&mut self, test: &Expr, then: &Expr, otherwise: &Expr, expr: &Expr) -> OrmResult<Fragment> {
        let test = self.compile(test)?;
        if let Some(v) = &test.constant {
            return match v {
                Value::Bool(true) => self.compile(then),
                Value::Bool(false) | Value::Null => self.compile(otherwise),
                _ => Err(OrmError::unsupported(expr)),
            };
        }
        let mut t = self.compile(then)?;
        let mut o = self.compile(otherwise)?;
        share_converter(&mut t, &mut o);
        let value_type = t.value_type.merge(&o.value_type);
        let converter = t.converter.clone().or_else(|| o.converter.clone());
        let has_field = test.has_field || t.has_field || o.has_field;
        let cond = self.predicate(test, expr)?;
        let ts = self.operand(t)?;
        let os = self.operand(o)?;
        let mut out = Fragment::sql(format!("CASE WHEN {cond} THEN {ts} ELSE {os} END"), value_type, has_field);
        out.converter = converter;
        Ok(out)
    }

    fn aggregate(&mut self, elements: &[usize], method: &str, args: &[Expr], expr: &Expr) -> OrmResult<Fragment> {
        let function = match method {
            "count" => "COUNT",
            "sum" => "SUM",
            "min" => "MIN",
            "max" => "MAX",
            "avg" | "average" => "AVG",
            _ => return Err(OrmError::unsupported(expr)),
        };
        let selector = match args {
            [] => None,
            [Expr::Lambda(l)] => Some(l.as_ref()),
            _ => return Err(OrmError::unsupported(expr)),
        };
        let Some(selector) = selector else {
            return match function {
                "COUNT" => Ok(Fragment::sql("COUNT(*)", ValueType::I64, true)),
                _ => Err(OrmError::unsupported(expr)),
            };
        };

        self.resolver.bind_to(&selector.params, elements)?;
        let body = self.compile(&selector.body);
        self.resolver.unbind();
        let body = body?;

        if function == "COUNT" {
            let cond = self.predicate(body, expr)?;
            return Ok(Fragment::sql(format!("COUNT(CASE WHEN {cond} THEN 1 END)"), ValueType::I64, true));
        }
        let value_type = match (function, &body.value_type) {
            ("AVG", _) => ValueType::F64,
            ("SUM", ValueType::I16 | ValueType::I32) => ValueType::I64,
            (_, vt) => vt.clone(),
        };
        let converter = matches!(function, "MIN" | "MAX")
            .then(|| body.converter.clone())
            .flatten();
        let inner = self.operand(body)?;
        let mut out = Fragment::sql(format!("{function}({inner})"), value_type, true);
        out.converter = converter;
        Ok(out)
    }

    // ==================== Projections ====================

    /// Compile a projection lambda into a numbered reader-field tree.
    pub fn projection(&mut self, lambda: &Lambda) -> OrmResult<Vec<ReaderField>> {
        let mut fields = self.with_lambda(lambda, |c, body| c.project(body))?;
        ReaderField::number(&mut fields);
        Ok(fields)
    }

    /// Compile an include selector (`o => o.customer`) into its wiring field.
    pub fn include(&mut self, lambda: &Lambda) -> OrmResult<ReaderField> {
        self.with_lambda(lambda, |c, body| {
            let (root, path) = body.member_path().ok_or_else(|| OrmError::unsupported(body))?;
            match c.resolve_path(root, &path, body)? {
                Resolved::Navigation { segment, member } => c.include_field(&member.name, segment, &member),
                _ => Err(OrmError::unsupported(body)),
            }
        })
    }

    fn project(&mut self, expr: &Expr) -> OrmResult<Vec<ReaderField>> {
        if let Expr::New { entity, members } = expr {
            let owner = entity
                .as_deref()
                .map(|e| self.catalog().entity(e))
                .transpose()?;
            return members
                .iter()
                .map(|(name, init)| self.project_member(name, init, owner.as_deref()))
                .collect();
        }
        if let Some((root, path)) = expr.member_path() {
            return match self.resolve_path(root, &path, expr)? {
                Resolved::Object(fields, _) => Ok(fields),
                Resolved::Navigation { segment, member } => {
                    Ok(vec![self.include_field(&member.name, segment, &member)?])
                }
                Resolved::Scalar(frag) => {
                    let name = path.last().copied().unwrap_or("value");
                    let mut field = self.scalar_field(name, frag)?;
                    field.source_member = Some(name.to_string());
                    Ok(vec![field])
                }
            };
        }
        let frag = self.compile(expr)?;
        Ok(vec![self.scalar_field("value", frag)?])
    }

    fn project_member(&mut self, name: &str, init: &Expr, owner: Option<&EntityMap>) -> OrmResult<ReaderField> {
        let owned = owner.and_then(|o| o.try_member(name)).cloned();
        if let Some((root, path)) = init.member_path() {
            match self.resolve_path(root, &path, init)? {
                Resolved::Object(children, vt) => return Ok(ReaderField::object(name, vt, children)),
                Resolved::Navigation { segment, member } => return self.include_field(name, segment, &member),
                Resolved::Scalar(mut frag) => {
                    if let Some(m) = &owned {
                        frag.value_type = m.value_type.clone();
                        frag.converter = frag.converter.or_else(|| m.converter.clone());
                    }
                    let mut field = self.scalar_field(name, frag)?;
                    field.source_member = path.last().map(|s| s.to_string());
                    return Ok(field);
                }
            }
        }
        if let Expr::New { entity, .. } = init {
            let children = self.project(init)?;
            let vt = ValueType::Object(entity.clone().unwrap_or_else(|| name.to_string()));
            return Ok(ReaderField::object(name, vt, children));
        }
        let mut frag = self.compile(init)?;
        if let Some(m) = &owned {
            frag.value_type = m.value_type.clone();
            frag.converter = frag.converter.or_else(|| m.converter.clone());
        }
        self.scalar_field(name, frag)
    }

    fn scalar_field(&mut self, name: &str, frag: Fragment) -> OrmResult<ReaderField> {
        let value_type = frag.value_type.clone();
        let converter = frag.converter.clone();
        let sql = self.operand(frag)?;
        let mut field = ReaderField::scalar(name, sql, value_type);
        field.converter = converter;
        Ok(field)
    }

    /// Reader field for a navigation member: a joined reference, or a
    /// collection loaded by the materializer through a keyed child query.
    fn include_field(&mut self, name: &str, segment: usize, member: &MemberMap) -> OrmResult<ReaderField> {
        let nav = member
            .navigation
            .clone()
            .ok_or_else(|| OrmError::mapping(format!("'{}' is not a navigation", member.name)))?;
        let owner = self.segment_entity(segment)?;
        let target = self.catalog().entity(&nav.target)?;
        let mut field = match nav.kind {
            NavigationKind::ToOne => {
                let joined = self.navigation_join(segment, &owner, member)?;
                let children = self.entity_fields(joined, &target);
                let mut f = ReaderField::object(name, ValueType::Object(target.name().to_string()), children);
                f.include = Some(IncludeWiring::Reference {
                    member: name.to_string(),
                    target: target.name().to_string(),
                });
                f
            }
            NavigationKind::ToMany => {
                let principal = owner.key_members().next().ok_or_else(|| {
                    OrmError::mapping(format!("entity '{}' has no key for '{}'", owner.name(), member.name))
                })?;
                let foreign_key = target.member(&nav.foreign_key)?.column.clone();
                let vt = ValueType::Array(Box::new(ValueType::Object(target.name().to_string())));
                let mut f = ReaderField::object(name, vt, Vec::new());
                f.include = Some(IncludeWiring::Collection {
                    member: name.to_string(),
                    target: target.name().to_string(),
                    foreign_key,
                    principal_key: principal.name.clone(),
                });
                f
            }
        };
        field.source_member = Some(member.name.clone());
        Ok(field)
    }
}

/// Apply a converter to a non-null value.
pub(crate) fn to_db(value: Value, converter: Option<&Arc<dyn ValueConverter>>) -> OrmResult<Value> {
    match converter {
        Some(c) if !value.is_null() => c.to_db(value),
        _ => Ok(value),
    }
}

fn fold(expr: &Expr) -> OrmResult<Fragment> {
    expr.evaluate().map(Fragment::constant)
}

fn field_fragment(field: &ReaderField) -> Fragment {
    let mut frag = Fragment::sql(field.sql.clone(), field.value_type.clone(), true);
    frag.converter = field.converter.clone();
    frag
}

/// A constant compared with a converted column is converted too.
fn share_converter(l: &mut Fragment, r: &mut Fragment) {
    if l.has_field && r.is_constant() && r.converter.is_none() {
        r.converter = l.converter.clone();
    }
    if r.has_field && l.is_constant() && l.converter.is_none() {
        l.converter = r.converter.clone();
    }
}

fn short_circuit(op: BinaryOp, constant: bool, other: Fragment) -> Fragment {
    match (op, constant) {
        (BinaryOp::And, true) | (BinaryOp::Or, false) => other,
        (BinaryOp::And, false) => Fragment::constant(Value::Bool(false)),
        _ => Fragment::constant(Value::Bool(true)),
    }
}
