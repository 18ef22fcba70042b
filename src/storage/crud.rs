use super::resource::{Collection, Resource};
use super::schema::Database;
use super::types::{DatabaseError, Record};
use super::values::{bind_values, Filter, Query, Value, Values};

/// Combine the implicit `id = ?` of a row resource with the caller's filter.
fn resource_filter(resource: &Resource, filter: &Filter) -> Filter {
    match resource.id {
        Some(id) => Filter::eq("id", id).and(filter.clone()),
        None => filter.clone(),
    }
}

fn where_sql(filter: &Filter) -> String {
    if filter.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", filter.clause())
    }
}

impl Database {
    // ========================================================================
    // Generic Resource Operations
    // ========================================================================

    /// Query rows of `T`'s collection.
    ///
    /// When `resource` names a row, `id = <id>` is ANDed with `query.filter`.
    /// A projected query must select every column `T` decodes.
    pub async fn query<T: Record>(
        &self,
        resource: Resource,
        query: &Query,
    ) -> Result<Vec<T>, DatabaseError> {
        Self::check_resource::<T>(&resource)?;
        let (sql, filter) = Self::select_sql(&resource, query)?;

        let rows = bind_values!(sqlx::query_as::<_, T>(&sql), filter.args())
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(rows)
    }

    /// Query the single column `query` selects.
    pub async fn query_scalar<V>(
        &self,
        resource: Resource,
        query: &Query,
    ) -> Result<Vec<V>, DatabaseError>
    where
        V: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite> + Send + Unpin,
    {
        if query.columns.len() != 1 {
            return Err(DatabaseError::Constraint(format!(
                "scalar query on {} must select one column, got {}",
                resource.collection.table(),
                query.columns.len()
            )));
        }
        let (sql, filter) = Self::select_sql(&resource, query)?;

        let values = bind_values!(sqlx::query_scalar::<_, V>(&sql), filter.args())
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(values)
    }

    fn select_sql(resource: &Resource, query: &Query) -> Result<(String, Filter), DatabaseError> {
        let collection = resource.collection;
        let filter = resource_filter(resource, &query.filter);

        let mut sql = format!(
            "SELECT {} FROM {}{}",
            query.select_clause(collection)?,
            collection.table(),
            where_sql(&filter)
        );
        let order = query.order_clause(collection)?;
        if !order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order);
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit.max(0)));
        }
        Ok((sql, filter))
    }

    /// Fetch one row by id.
    pub async fn get<T: Record>(&self, id: i64) -> Result<Option<T>, DatabaseError> {
        let rows = self
            .query::<T>(Resource::row(T::COLLECTION, id), &Query::new())
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Count rows matching `filter` (and the resource id, if any).
    pub async fn count(&self, resource: Resource, filter: &Filter) -> Result<i64, DatabaseError> {
        let filter = resource_filter(&resource, filter);
        let sql = format!(
            "SELECT COUNT(*) FROM {}{}",
            resource.collection.table(),
            where_sql(&filter)
        );
        let count: i64 = bind_values!(sqlx::query_scalar::<_, i64>(&sql), filter.args())
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(count)
    }

    /// Whether a row with this id exists.
    pub async fn exists(&self, resource: Resource) -> Result<bool, DatabaseError> {
        Ok(self.count(resource, &Filter::all()).await? > 0)
    }

    /// Insert a row and return its id.
    ///
    /// # Errors
    ///
    /// `DatabaseError::Constraint` when a required column is absent, a column
    /// is unknown, or SQLite rejects the row (e.g. duplicate primary key).
    ///
    /// On success observers are notified with the new row's resource.
    pub async fn insert(
        &self,
        collection: Collection,
        values: Values,
    ) -> Result<i64, DatabaseError> {
        values.validate(collection)?;
        if let Some(missing) = collection
            .required()
            .iter()
            .find(|column| !values.contains(column))
        {
            return Err(DatabaseError::Constraint(format!(
                "missing required column '{}' for {}",
                missing,
                collection.table()
            )));
        }

        let columns: Vec<&str> = values.columns().collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            collection.table(),
            columns.join(", "),
            placeholders
        );
        let args: Vec<Value> = values.values().cloned().collect();

        let id = {
            let _guard = self.write_gate.lock().await;
            bind_values!(sqlx::query(&sql), args.iter())
                .execute(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?
                .last_insert_rowid()
        };

        if id <= 0 {
            return Err(DatabaseError::Constraint(format!(
                "failed to insert row into {}",
                collection.table()
            )));
        }

        self.notify_change(Resource::row(collection, id));
        Ok(id)
    }

    /// Update matching rows and return how many changed.
    ///
    /// Observers are notified with `resource` whatever the count, including
    /// zero.
    pub async fn update(
        &self,
        resource: Resource,
        values: Values,
        filter: &Filter,
    ) -> Result<u64, DatabaseError> {
        let collection = resource.collection;
        values.validate(collection)?;
        if values.is_empty() {
            return Err(DatabaseError::Constraint(format!(
                "update of {} sets no columns",
                resource
            )));
        }

        let filter = resource_filter(&resource, filter);
        let assignments: Vec<String> = values.columns().map(|c| format!("{} = ?", c)).collect();
        let sql = format!(
            "UPDATE {} SET {}{}",
            collection.table(),
            assignments.join(", "),
            where_sql(&filter)
        );
        let args: Vec<Value> = values
            .values()
            .cloned()
            .chain(filter.args().iter().cloned())
            .collect();

        let affected = {
            let _guard = self.write_gate.lock().await;
            bind_values!(sqlx::query(&sql), args.iter())
                .execute(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?
                .rows_affected()
        };

        self.notify_change(resource);
        Ok(affected)
    }

    fn check_resource<T: Record>(resource: &Resource) -> Result<Collection, DatabaseError> {
        if resource.collection != T::COLLECTION {
            return Err(DatabaseError::Constraint(format!(
                "resource {} does not hold {} rows",
                resource,
                T::COLLECTION
            )));
        }
        Ok(resource.collection)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{
        Collection, Database, DatabaseError, Direction, Filter, Item, Query, Resource,
        Subscription, Values,
    };

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn item_values(id: i64, subscription_id: i64) -> Values {
        Values::new()
            .set("id", id)
            .set("subscription_id", subscription_id)
            .set("title", format!("Item {}", id))
            .set("uri", format!("https://example.com/{}", id))
            .set("unread", true)
    }

    #[tokio::test]
    async fn test_insert_returns_id_and_notifies_row() {
        let db = test_db().await;
        let mut changes = db.subscribe_changes();

        let id = db
            .insert(Collection::Subscription, Values::new().set("id", 5).set("title", "Feed"))
            .await
            .unwrap();
        assert_eq!(id, 5);
        assert_eq!(changes.recv().await.unwrap(), Resource::subscription(5));
    }

    #[tokio::test]
    async fn test_insert_missing_required_column() {
        let db = test_db().await;
        let result = db
            .insert(Collection::Item, Values::new().set("id", 1).set("title", "x"))
            .await;
        assert!(matches!(result, Err(DatabaseError::Constraint(_))));
    }

    #[tokio::test]
    async fn test_insert_unknown_column() {
        let db = test_db().await;
        let result = db
            .insert(
                Collection::Subscription,
                Values::new().set("id", 1).set("guid", "x"),
            )
            .await;
        assert!(matches!(result, Err(DatabaseError::Constraint(_))));
    }

    #[tokio::test]
    async fn test_insert_duplicate_id_is_constraint_error() {
        let db = test_db().await;
        db.insert(Collection::Item, item_values(1, 1)).await.unwrap();
        let result = db.insert(Collection::Item, item_values(1, 1)).await;
        assert!(matches!(result, Err(DatabaseError::Constraint(_))));
    }

    #[tokio::test]
    async fn test_query_row_resource_ands_filter() {
        let db = test_db().await;
        db.insert(Collection::Item, item_values(1, 1)).await.unwrap();
        db.insert(Collection::Item, item_values(2, 1)).await.unwrap();

        let rows: Vec<Item> = db
            .query(
                Resource::item(1),
                &Query::new().filter(Filter::eq("subscription_id", 1)),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 1);

        let rows: Vec<Item> = db
            .query(
                Resource::item(1),
                &Query::new().filter(Filter::eq("subscription_id", 2)),
            )
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_query_scalar_reads_projected_column() {
        let db = test_db().await;
        for id in 1..=3 {
            db.insert(Collection::Item, item_values(id, 1)).await.unwrap();
        }
        db.insert(Collection::Item, item_values(9, 2)).await.unwrap();

        let titles: Vec<String> = db
            .query_scalar(
                Resource::items(),
                &Query::new()
                    .select(&["title"])
                    .filter(Filter::eq("subscription_id", 1))
                    .order_by("id", Direction::Desc),
            )
            .await
            .unwrap();
        assert_eq!(titles, vec!["Item 3", "Item 2", "Item 1"]);
    }

    #[tokio::test]
    async fn test_query_scalar_needs_one_column() {
        let db = test_db().await;
        for columns in [&[][..], &["id", "title"][..]] {
            let result = db
                .query_scalar::<i64>(Resource::items(), &Query::new().select(columns))
                .await;
            assert!(matches!(result, Err(DatabaseError::Constraint(_))));
        }
    }

    #[tokio::test]
    async fn test_query_order_and_limit() {
        let db = test_db().await;
        for id in 1..=5 {
            db.insert(Collection::Item, item_values(id, 1)).await.unwrap();
        }

        let rows: Vec<Item> = db
            .query(
                Resource::items(),
                &Query::new().order_by("id", Direction::Desc).limit(2),
            )
            .await
            .unwrap();
        let ids: Vec<i64> = rows.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![5, 4]);
    }

    #[tokio::test]
    async fn test_query_wrong_record_type() {
        let db = test_db().await;
        let result = db.query::<Subscription>(Resource::items(), &Query::new()).await;
        assert!(matches!(result, Err(DatabaseError::Constraint(_))));
    }

    #[tokio::test]
    async fn test_update_notifies_even_when_nothing_matches() {
        let db = test_db().await;
        let mut changes = db.subscribe_changes();

        let count = db
            .update(
                Resource::items(),
                Values::new().set("unread", false),
                &Filter::eq("subscription_id", 99),
            )
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(changes.recv().await.unwrap(), Resource::items());
    }

    #[tokio::test]
    async fn test_update_row_resource() {
        let db = test_db().await;
        db.insert(Collection::Item, item_values(1, 1)).await.unwrap();
        db.insert(Collection::Item, item_values(2, 1)).await.unwrap();

        let count = db
            .update(Resource::item(2), Values::new().set("unread", false), &Filter::all())
            .await
            .unwrap();
        assert_eq!(count, 1);

        let unread = db
            .count(Resource::items(), &Filter::eq("unread", true))
            .await
            .unwrap();
        assert_eq!(unread, 1);
    }

    #[tokio::test]
    async fn test_update_without_values_rejected() {
        let db = test_db().await;
        let result = db
            .update(Resource::items(), Values::new(), &Filter::all())
            .await;
        assert!(matches!(result, Err(DatabaseError::Constraint(_))));
    }

    #[tokio::test]
    async fn test_get_and_exists() {
        let db = test_db().await;
        db.insert(Collection::Item, item_values(3, 1)).await.unwrap();

        let item: Item = db.get(3).await.unwrap().unwrap();
        assert_eq!(item.title.as_deref(), Some("Item 3"));
        assert!(item.unread);
        assert!(db.exists(Resource::item(3)).await.unwrap());
        assert!(!db.exists(Resource::item(4)).await.unwrap());
    }
}
