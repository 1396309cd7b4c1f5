use std::{str::FromStr, time::Duration};

use sqlx::{
    migrate::MigrateError,
    sqlite::{
        SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
    },
    Row, SqlitePool,
};
use thiserror::Error;

use staffdir_core::types::{round_cents, DepartmentSalary, Employee, EmployeeUpdate};

/// SQLite extended result codes for `UNIQUE` and `PRIMARY KEY` violations.
const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";
const SQLITE_CONSTRAINT_PRIMARYKEY: &str = "1555";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    ///
    /// Journal mode, synchronous level and busy timeout are applied to every pooled connection.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle to the employee collection.
    pub fn employees(&self) -> EmployeeRepository {
        EmployeeRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository responsible for the `employees` table.
#[derive(Clone)]
pub struct EmployeeRepository {
    pool: SqlitePool,
}

const EMPLOYEE_COLUMNS: &str = "employee_id, name, department, salary, joining_date, skills_json";

impl EmployeeRepository {
    /// Inserts a new employee, failing with [`EmployeeError::AlreadyExists`] when the id is taken.
    pub async fn insert(&self, employee: &Employee) -> Result<(), EmployeeError> {
        let skills_json = serde_json::to_string(&employee.skills)?;
        sqlx::query(
            "INSERT INTO employees \
             (employee_id, name, department, salary, joining_date, skills_json) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&employee.employee_id)
        .bind(&employee.name)
        .bind(&employee.department)
        .bind(employee.salary)
        .bind(&employee.joining_date)
        .bind(skills_json)
        .execute(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err) => {
                let duplicate = matches!(
                    db_err.code().as_deref(),
                    Some(SQLITE_CONSTRAINT_UNIQUE | SQLITE_CONSTRAINT_PRIMARYKEY)
                );
                if duplicate {
                    EmployeeError::AlreadyExists
                } else {
                    EmployeeError::Database(sqlx::Error::Database(db_err))
                }
            }
            other => EmployeeError::Database(other),
        })?;

        Ok(())
    }

    /// Fetches a single employee by its public identifier.
    pub async fn fetch(&self, employee_id: &str) -> Result<Option<Employee>, EmployeeError> {
        let row = sqlx::query(&format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE employee_id = ?"
        ))
        .bind(employee_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| employee_from_row(&row)).transpose()
    }

    /// Lists a department's employees, most recent `joining_date` first.
    ///
    /// Dates are compared as plain strings.
    pub async fn list_by_department(
        &self,
        department: &str,
    ) -> Result<Vec<Employee>, EmployeeError> {
        let rows = sqlx::query(&format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employees \
             WHERE department = ? \
             ORDER BY joining_date DESC, id ASC"
        ))
        .bind(department)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(employee_from_row).collect()
    }

    /// Lists employees whose skills contain `skill` exactly.
    pub async fn search_by_skill(&self, skill: &str) -> Result<Vec<Employee>, EmployeeError> {
        let rows = sqlx::query(&format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employees \
             WHERE EXISTS (SELECT 1 FROM json_each(employees.skills_json) AS s WHERE s.value = ?) \
             ORDER BY id ASC"
        ))
        .bind(skill)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(employee_from_row).collect()
    }

    /// Applies the supplied fields of `update`, returning `false` when no employee matched.
    pub async fn update(
        &self,
        employee_id: &str,
        update: &EmployeeUpdate,
    ) -> Result<bool, EmployeeError> {
        if update.is_empty() {
            return Err(EmployeeError::EmptyUpdate);
        }

        let skills_json = update
            .skills
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            "UPDATE employees \
             SET name = COALESCE(?, name), \
                 department = COALESCE(?, department), \
                 salary = COALESCE(?, salary), \
                 joining_date = COALESCE(?, joining_date), \
                 skills_json = COALESCE(?, skills_json) \
             WHERE employee_id = ?",
        )
        .bind(update.name.as_deref())
        .bind(update.department.as_deref())
        .bind(update.salary)
        .bind(update.joining_date.as_deref())
        .bind(skills_json)
        .bind(employee_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes an employee, returning `false` when it did not exist.
    pub async fn delete(&self, employee_id: &str) -> Result<bool, EmployeeError> {
        let result = sqlx::query("DELETE FROM employees WHERE employee_id = ?")
            .bind(employee_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Average salary per department, rounded to two decimals and ordered by department.
    pub async fn average_salary_by_department(
        &self,
    ) -> Result<Vec<DepartmentSalary>, EmployeeError> {
        let rows = sqlx::query(
            "SELECT department, AVG(salary) AS avg_salary \
             FROM employees \
             GROUP BY department \
             ORDER BY department ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<DepartmentSalary, EmployeeError> {
                let avg_salary: f64 = row.try_get("avg_salary")?;
                Ok(DepartmentSalary {
                    department: row.try_get("department")?,
                    avg_salary: round_cents(avg_salary),
                })
            })
            .collect()
    }
}

fn employee_from_row(row: &SqliteRow) -> Result<Employee, EmployeeError> {
    let skills_json: String = row.try_get("skills_json")?;
    Ok(Employee {
        employee_id: row.try_get("employee_id")?,
        name: row.try_get("name")?,
        department: row.try_get("department")?,
        salary: row.try_get("salary")?,
        joining_date: row.try_get("joining_date")?,
        skills: serde_json::from_str(&skills_json)?,
    })
}

/// Errors that can occur while operating on employees.
#[derive(Debug, Error)]
pub enum EmployeeError {
    #[error("employee with the same id already exists")]
    AlreadyExists,
    #[error("no fields provided for update")]
    EmptyUpdate,
    #[error("failed to encode or decode skills json: {0}")]
    Skills(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
