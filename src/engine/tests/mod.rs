mod helpers;
mod tests_compaction;
mod tests_put_get;
mod tests_snapshots;
