//! # SQL statements
//! This module contains all of the SQL statements used by [`Catalog`](`super::Catalog`).
//! The statements are included in the documentation for the corresponding functions.

/// A convenience macro for generating the function and the corresponding documentation.
macro_rules! sql {
    ($name:ident, $desc:expr) => {
        #[doc = concat!($desc, ".")]
        ///
        /// Returns the following statement as a string:
        /// ```sql
        #[doc = include_str!(concat!("sql/", stringify!($name), ".sql"))]
        ///```
        pub const fn $name() -> &'static str {
            include_str!(concat!("sql/", stringify!($name), ".sql"))
        }
    };
}

sql!(init_files, "Create the files table");

sql!(set_wal, "Set write-ahead log");

sql!(get_table_schema, "Get the table schema");

sql!(insert_file, "Insert a file row");

sql!(append_file, "Insert a file row unless the path already exists");

sql!(update_file, "Update the mutable columns of a file row");

sql!(delete_file, "Delete a file row");

sql!(
    delete_descendants,
    "Delete the entire derivation subtree below a file row"
);

sql!(select_files, "Select file rows");

sql!(count_files, "Count file rows");

sql!(subfolders, "Get the distinct top-level folders");

sql!(get_file, "Get a file row by id");

sql!(get_id_by_path, "Get a file row id by path");
